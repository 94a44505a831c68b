use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use serde::ser::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::inbox::Delivery;
use crate::message::{local_type_name, GenericMessage, Message, MessageType, ShellExecReq};
use crate::Result;

/// Wire key carrying the fully qualified message type tag.
pub const MSG_TYPE: &str = "msgType";
/// Wire key carrying a generic message's payload map.
pub const MAP: &str = "map";

/// Raw wire form of a message: the JSON object found under a send frame's
/// `message` key, with every attribute the peer put there.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn msg_id(&self) -> Option<&str> {
        self.str_field("msgID")
    }

    pub fn in_reply_to(&self) -> Option<&str> {
        self.str_field("inReplyTo")
    }

    /// Recipient in wire form (`#` prefix for topics).
    pub fn recipient(&self) -> Option<&str> {
        self.str_field("recipient")
    }

    pub fn msg_type(&self) -> Option<&str> {
        self.str_field(MSG_TYPE)
    }

    /// Local name of the type tag, e.g. `GenericMessage`.
    pub fn type_name(&self) -> Option<&str> {
        self.msg_type().map(local_type_name)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn decode<T: MessageType>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }
}

/// Produces the wire fields of a typed message.
///
/// Null attributes are dropped, a trailing underscore is stripped from
/// attribute names (`from_` travels as `from`), the `map` attribute is left
/// for the frame to carry, and `msgType` is set from the type tag.
pub fn encode<M: MessageType>(msg: &M) -> Result<Envelope> {
    let Value::Object(fields) = serde_json::to_value(msg)? else {
        return Err(serde_json::Error::custom("message did not serialize to an object").into());
    };
    let mut wire = Map::with_capacity(fields.len() + 1);
    for (key, value) in fields {
        if value.is_null() {
            continue;
        }
        let key = match key.strip_suffix('_') {
            Some(stripped) => stripped.to_string(),
            None => key,
        };
        if key == MAP {
            continue;
        }
        wire.insert(key, value);
    }
    wire.insert(MSG_TYPE.into(), Value::String(M::TYPE_TAG.into()));
    Ok(Envelope(wire))
}

/// Message decoded from an inbox delivery.
#[derive(Debug)]
pub enum Received {
    Message(Message),
    Generic(GenericMessage),
    ShellExec(ShellExecReq),
    /// Application type added with [`MessageRegistry::register_type`].
    Custom(CustomMessage),
    /// Unknown type tag or undecodable attributes.
    Raw(Envelope),
}

impl Received {
    /// Base attributes, for every variant that has typed ones.
    pub fn header(&self) -> Option<&Message> {
        match self {
            Received::Message(m) => Some(m),
            Received::Generic(m) => Some(&m.header),
            Received::ShellExec(m) => Some(&m.header),
            Received::Custom(m) => Some(&m.header),
            Received::Raw(_) => None,
        }
    }

    pub fn into_generic(self) -> Option<GenericMessage> {
        match self {
            Received::Generic(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_raw(self) -> Option<Envelope> {
        match self {
            Received::Raw(e) => Some(e),
            _ => None,
        }
    }
}

/// Type-erased instance of an application message type.
pub struct CustomMessage {
    type_tag: &'static str,
    header: Message,
    value: Box<dyn Any + Send>,
}

impl CustomMessage {
    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    /// Base attributes of the wrapped message.
    pub fn header(&self) -> &Message {
        &self.header
    }

    pub fn is<T: MessageType>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn downcast<T: MessageType>(self) -> std::result::Result<T, Self> {
        let Self {
            type_tag,
            header,
            value,
        } = self;
        value.downcast::<T>().map(|b| *b).map_err(|value| Self {
            type_tag,
            header,
            value,
        })
    }
}

impl fmt::Debug for CustomMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomMessage")
            .field("type_tag", &self.type_tag)
            .field("msg_id", &self.header.msg_id())
            .finish_non_exhaustive()
    }
}

/// Builds a typed message from an envelope and the frame's sibling map.
pub type Factory = fn(&Envelope, Option<Map<String, Value>>) -> serde_json::Result<Received>;

fn decode_message(env: &Envelope, _map: Option<Map<String, Value>>) -> serde_json::Result<Received> {
    env.decode().map(Received::Message)
}

/// Decodes a typed message and merges the sibling map into types that
/// carry one.
pub fn decode_typed<T: MessageType>(
    env: &Envelope,
    map: Option<Map<String, Value>>,
) -> serde_json::Result<T> {
    let mut msg: T = env.decode()?;
    let Some(target) = msg.payload_map_mut() else {
        return Ok(msg);
    };
    match map {
        Some(map) => target.extend(map),
        None => warn!(msg_id = %msg.header().msg_id(), msg_type = T::TYPE_TAG, "No map field found in message"),
    }
    Ok(msg)
}

fn decode_generic(env: &Envelope, map: Option<Map<String, Value>>) -> serde_json::Result<Received> {
    decode_typed(env, map).map(Received::Generic)
}

fn decode_shell_exec(env: &Envelope, _map: Option<Map<String, Value>>) -> serde_json::Result<Received> {
    env.decode().map(Received::ShellExec)
}

fn decode_custom<T: MessageType>(
    env: &Envelope,
    map: Option<Map<String, Value>>,
) -> serde_json::Result<Received> {
    let value: T = decode_typed(env, map)?;
    Ok(Received::Custom(CustomMessage {
        type_tag: T::TYPE_TAG,
        header: value.header().clone(),
        value: Box::new(value),
    }))
}

/// Static registry from type tags to message factories.
///
/// Lookup tries the full tag first and then its local name, so peers that
/// qualify a type differently (`org.arl.fjage.messages.GenericMessage`)
/// still resolve. Anything unresolved decodes to [`Received::Raw`].
#[derive(Clone, Default)]
pub struct MessageRegistry {
    by_tag: HashMap<String, Factory>,
    by_name: HashMap<String, Factory>,
}

impl MessageRegistry {
    /// Registry without any types; every delivery decodes raw.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Message::TYPE_TAG, decode_message);
        registry.register(GenericMessage::TYPE_TAG, decode_generic);
        registry.register(ShellExecReq::TYPE_TAG, decode_shell_exec);
        registry
    }

    pub fn register(&mut self, type_tag: &str, factory: Factory) {
        self.by_tag.insert(type_tag.to_string(), factory);
        self.by_name
            .insert(local_type_name(type_tag).to_string(), factory);
    }

    /// Registers an application type decoding to [`Received::Custom`].
    pub fn register_type<T: MessageType>(&mut self) {
        self.register(T::TYPE_TAG, decode_custom::<T>);
    }

    pub fn resolve(&self, type_tag: &str) -> Option<Factory> {
        self.by_tag
            .get(type_tag)
            .or_else(|| self.by_name.get(local_type_name(type_tag)))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }

    /// Decodes a delivery, falling back to the raw envelope on failure.
    pub fn decode(&self, delivery: Delivery) -> Received {
        let Delivery { message, map } = delivery;
        let Some(factory) = message.msg_type().and_then(|tag| self.resolve(tag)) else {
            debug!(msg_type = ?message.msg_type(), "Unregistered message type, returning raw envelope");
            return Received::Raw(message);
        };
        match factory(&message, map) {
            Ok(received) => received,
            Err(e) => {
                warn!(msg_type = ?message.msg_type(), error = %e, "Failed to decode message, returning raw envelope");
                Received::Raw(message)
            }
        }
    }
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.by_tag.keys().collect();
        tags.sort();
        f.debug_struct("MessageRegistry").field("types", &tags).finish()
    }
}
