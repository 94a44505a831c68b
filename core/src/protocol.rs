// Wire frames exchanged with the master container
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::Envelope;

/// Server-initiated requests and the outbound queries that share their names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Agents,
    ContainsAgent,
    Services,
    AgentForService,
    AgentsForService,
    Send,
    Shutdown,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agents => "agents",
            Self::ContainsAgent => "containsAgent",
            Self::Services => "services",
            Self::AgentForService => "agentForService",
            Self::AgentsForService => "agentsForService",
            Self::Send => "send",
            Self::Shutdown => "shutdown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "agents" => Some(Self::Agents),
            "containsAgent" => Some(Self::ContainsAgent),
            "services" => Some(Self::Services),
            "agentForService" => Some(Self::AgentForService),
            "agentsForService" => Some(Self::AgentsForService),
            "send" => Some(Self::Send),
            "shutdown" => Some(Self::Shutdown),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One JSON object on the wire, in either direction.
///
/// Every field is optional; absent fields are left out when serializing.
/// `action` stays a string so that unsupported actions survive parsing and
/// can be reported by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(
        rename = "inResponseTo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub in_response_to: Option<String>,
    #[serde(rename = "agentID", default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(rename = "agentIDs", default, skip_serializing_if = "Option::is_none")]
    pub agent_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Envelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<Map<String, Value>>,
}

impl Frame {
    pub fn request(action: Action) -> Self {
        Self {
            action: Some(action.as_str().into()),
            ..Self::default()
        }
    }

    /// Reply to a server request, echoing its correlation id.
    pub fn reply(action: Action, id: Option<String>) -> Self {
        Self {
            id,
            in_response_to: Some(action.as_str().into()),
            ..Self::default()
        }
    }

    pub fn send(message: Envelope, map: Option<Map<String, Value>>) -> Self {
        Self {
            action: Some(Action::Send.as_str().into()),
            relay: Some(true),
            message: Some(message),
            map,
            ..Self::default()
        }
    }

    pub fn shutdown() -> Self {
        Self::request(Action::Shutdown)
    }

    pub fn parse(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }

    /// Newline-terminated JSON, ready for the socket.
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}
