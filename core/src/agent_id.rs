use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Prefix marking a topic in the wire form of an agent identifier.
pub const TOPIC_PREFIX: char = '#';
/// Suffix naming the notification topic of an agent (`nav` -> `nav__ntf`).
pub const NOTIFICATION_SUFFIX: &str = "__ntf";

/// Identity of an agent or a topic on the bus.
///
/// Two identifiers are equal only if both the name and the topic flag match,
/// so the agent `nav` and the topic `nav` are distinct.
///
/// On the wire an identifier travels as a single string: agents by bare name,
/// topics prefixed with `#`.
///
/// # Examples
///
/// ```
/// use shuttle_core::AgentId;
///
/// let nav = AgentId::new("nav");
/// assert_eq!(nav.to_wire(), "nav");
///
/// let ntf = nav.notification_topic();
/// assert_eq!(ntf.name(), "nav__ntf");
/// assert_eq!(ntf.to_wire(), "#nav__ntf");
/// assert_eq!(AgentId::from_wire("#nav__ntf"), ntf);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentId {
    name: String,
    is_topic: bool,
}

impl AgentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_topic: false,
        }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_topic: true,
        }
    }

    /// Topic keyed by an enum-like value, named `{kind}.{value}`.
    pub fn qualified_topic(kind: &str, value: &str) -> Self {
        Self::topic(format!("{kind}.{value}"))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_topic(&self) -> bool {
        self.is_topic
    }

    /// Notification topic of an agent. Topics map to themselves.
    pub fn notification_topic(&self) -> AgentId {
        if self.is_topic {
            self.clone()
        } else {
            Self::topic(format!("{}{}", self.name, NOTIFICATION_SUFFIX))
        }
    }

    pub fn to_wire(&self) -> String {
        if self.is_topic {
            format!("{}{}", TOPIC_PREFIX, self.name)
        } else {
            self.name.clone()
        }
    }

    pub fn from_wire(raw: &str) -> Self {
        match raw.strip_prefix(TOPIC_PREFIX) {
            Some(name) => Self::topic(name),
            None => Self::new(raw),
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_topic {
            write!(f, "{}{}", TOPIC_PREFIX, self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

impl Serialize for AgentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wire())
    }
}

impl<'de> Deserialize<'de> for AgentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

/// Conversion into the canonical topic identifier.
///
/// A plain name becomes the topic of that name; an agent becomes its
/// notification topic; a topic stays as it is.
pub trait IntoTopic {
    fn into_topic(self) -> AgentId;
}

impl IntoTopic for &str {
    fn into_topic(self) -> AgentId {
        AgentId::topic(self)
    }
}

impl IntoTopic for String {
    fn into_topic(self) -> AgentId {
        AgentId::topic(self)
    }
}

impl IntoTopic for AgentId {
    fn into_topic(self) -> AgentId {
        self.notification_topic()
    }
}

impl IntoTopic for &AgentId {
    fn into_topic(self) -> AgentId {
        self.notification_topic()
    }
}
