use dashmap::DashSet;
use tracing::{debug, warn};

use crate::agent_id::IntoTopic;

/// Topics this gateway accepts deliveries for, keyed by bare topic name.
#[derive(Debug, Default)]
pub struct Subscriptions {
    topics: DashSet<String>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the topic. Returns false if it was already subscribed.
    pub fn subscribe(&self, topic: impl IntoTopic) -> bool {
        let topic = topic.into_topic();
        let added = self.topics.insert(topic.name().to_string());
        if added {
            debug!(topic = %topic, "Subscribed");
        } else {
            warn!(topic = %topic, "Already subscribed to topic");
        }
        added
    }

    /// Removes the topic. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, topic: impl IntoTopic) -> bool {
        let topic = topic.into_topic();
        let removed = self.topics.remove(topic.name()).is_some();
        if removed {
            debug!(topic = %topic, "Unsubscribed");
        } else {
            warn!(topic = %topic, "Unsubscribe from unknown topic");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.topics.contains(name)
    }

    /// Snapshot of subscribed topic names, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
