use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::AgentId;

/// Speech-act tag of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Performative {
    /// Request an action to be performed
    Request,
    /// Agree to perform the requested action
    Agree,
    /// Refuse to perform the requested action
    Refuse,
    /// Failure to perform a requested or agreed action
    Failure,
    /// Notification of an event
    Inform,
    /// Answer to a query is true
    Confirm,
    /// Answer to a query is false
    Disconfirm,
    /// Query whether a statement is true
    QueryIf,
    /// The message was not understood
    NotUnderstood,
    /// Call for proposal
    Cfp,
    /// Response to a CFP
    Propose,
    /// Cancel a pending request
    Cancel,
}

fn new_msg_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Base attributes shared by every message on the bus.
///
/// `msg_id` is generated when the message is built and cannot be changed
/// afterwards; replies reference it through `in_reply_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "msgID", default = "new_msg_id")]
    msg_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perf: Option<Performative>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<AgentId>,
    #[serde(
        rename = "inReplyTo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub in_reply_to: Option<String>,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            msg_id: new_msg_id(),
            perf: None,
            recipient: None,
            sender: None,
            in_reply_to: None,
        }
    }
}

impl Message {
    pub fn new(perf: Performative, recipient: AgentId) -> Self {
        Self {
            perf: Some(perf),
            recipient: Some(recipient),
            ..Self::default()
        }
    }

    /// Builds a reply addressed to the sender of `original`.
    pub fn reply_to(perf: Performative, original: &Message) -> Self {
        Self {
            perf: Some(perf),
            recipient: original.sender.clone(),
            in_reply_to: Some(original.msg_id.clone()),
            ..Self::default()
        }
    }

    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }
}

/// A message type the codec can put on and take off the wire.
///
/// Implementors flatten a [`Message`] into their own fields and name
/// themselves with a fully qualified type tag; the tag's last segment is what
/// type filters match against.
pub trait MessageType: Serialize + DeserializeOwned + Send + 'static {
    const TYPE_TAG: &'static str;

    fn header(&self) -> &Message;

    fn header_mut(&mut self) -> &mut Message;

    /// Unstructured payload carried as the sibling `map` field of a send frame.
    fn payload_map(&self) -> Option<&Map<String, Value>> {
        None
    }

    /// Target for the sibling `map` field when decoding.
    fn payload_map_mut(&mut self) -> Option<&mut Map<String, Value>> {
        None
    }
}

/// Last segment of a dotted type tag.
pub fn local_type_name(tag: &str) -> &str {
    tag.rsplit('.').next().unwrap_or(tag)
}

impl MessageType for Message {
    const TYPE_TAG: &'static str = "org.arl.fjage.Message";

    fn header(&self) -> &Message {
        self
    }

    fn header_mut(&mut self) -> &mut Message {
        self
    }
}

/// Message conveying free-form key/value pairs.
///
/// The map never appears among the message attributes on the wire: the codec
/// lifts it into a top-level `map` field next to `message`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenericMessage {
    #[serde(flatten)]
    pub header: Message,
    #[serde(skip)]
    pub map: Map<String, Value>,
}

impl GenericMessage {
    pub fn new(perf: Performative, recipient: AgentId) -> Self {
        Self {
            header: Message::new(perf, recipient),
            map: Map::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.map.insert(key.into(), value.into())
    }

    pub fn put_all(&mut self, entries: Map<String, Value>) {
        self.map.extend(entries);
    }
}

impl MessageType for GenericMessage {
    const TYPE_TAG: &'static str = "org.arl.fjage.GenericMessage";

    fn header(&self) -> &Message {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Message {
        &mut self.header
    }

    fn payload_map(&self) -> Option<&Map<String, Value>> {
        Some(&self.map)
    }

    fn payload_map_mut(&mut self) -> Option<&mut Map<String, Value>> {
        Some(&mut self.map)
    }
}

/// Request to run a shell command or script on the remote shell agent.
///
/// Carries either `cmd` or `script`, not both; a script may take `args`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellExecReq {
    #[serde(flatten)]
    pub header: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
}

impl ShellExecReq {
    pub fn command(recipient: AgentId, cmd: impl Into<String>) -> Self {
        Self {
            header: Message::new(Performative::Request, recipient),
            cmd: Some(cmd.into()),
            script: None,
            args: None,
        }
    }

    pub fn script(recipient: AgentId, path: impl Into<String>, args: Vec<String>) -> Self {
        let mut script = Map::new();
        script.insert("path".into(), Value::String(path.into()));
        Self {
            header: Message::new(Performative::Request, recipient),
            cmd: None,
            script: Some(Value::Object(script)),
            args: Some(args.into_iter().map(Value::String).collect()),
        }
    }
}

impl MessageType for ShellExecReq {
    const TYPE_TAG: &'static str = "org.arl.fjage.shell.ShellExecReq";

    fn header(&self) -> &Message {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Message {
        &mut self.header
    }
}
