// Shuttle Core Library
// Gateway client for JSON-over-TCP multi-agent message buses

pub mod agent_id;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod framing;
pub mod gateway;
pub mod inbox;
pub mod message;
pub mod pending;
pub mod protocol;
pub mod subscriptions;
pub mod timeout;

// Export core types
pub use agent_id::{AgentId, IntoTopic};
pub use codec::{CustomMessage, Envelope, MessageRegistry, Received};
pub use config::GatewayConfig;
pub use gateway::Gateway;
pub use inbox::{Delivery, Filter, Inbox};
pub use message::{GenericMessage, Message, MessageType, Performative, ShellExecReq};
pub use pending::{PendingReply, PendingRequests};
pub use protocol::{Action, Frame};
pub use subscriptions::Subscriptions;
pub use timeout::Timeout;

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShuttleError {
    #[error("Connection error: cannot reach {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Duplicate agent: {0} is already on the bus")]
    DuplicateAgent(String),

    #[error("Handshake error: no answer to duplicate check for {0}")]
    HandshakeTimeout(String),

    #[error("Message has no recipient")]
    NoRecipient,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
pub type Result<T> = std::result::Result<T, ShuttleError>;
