use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::agent_id::TOPIC_PREFIX;
use crate::codec::MAP;
use crate::inbox::{Delivery, Inbox};
use crate::pending::PendingRequests;
use crate::protocol::{Action, Frame};
use crate::subscriptions::Subscriptions;

/// What became of one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// Server request answered; the frame must be written back.
    Reply(Frame),
    /// Message queued in the inbox.
    Delivered,
    /// Answer handed to a pending query.
    Resolved,
    /// Nothing to do with this frame.
    Dropped,
    /// The master asked the gateway to stop.
    Shutdown,
}

/// Routes inbound frames to replies, the inbox or pending queries.
///
/// Owns no I/O. The connection reader feeds it frames in arrival order and
/// writes out any reply it produces.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    name: String,
    subscriptions: Arc<Subscriptions>,
    inbox: Arc<Inbox>,
    pending: Arc<PendingRequests>,
}

impl Dispatcher {
    pub fn new(
        name: impl Into<String>,
        subscriptions: Arc<Subscriptions>,
        inbox: Arc<Inbox>,
        pending: Arc<PendingRequests>,
    ) -> Self {
        Self {
            name: name.into(),
            subscriptions,
            inbox,
            pending,
        }
    }

    pub fn dispatch_bytes(&self, raw: &[u8]) -> Dispatched {
        match Frame::parse(raw) {
            Ok(frame) => self.dispatch(frame),
            Err(e) => {
                warn!(error = %e, bytes = raw.len(), "Dropping malformed frame");
                Dispatched::Dropped
            }
        }
    }

    pub fn dispatch(&self, frame: Frame) -> Dispatched {
        let Some(action) = frame.action.as_deref() else {
            return self.resolve(frame);
        };
        let Some(action) = Action::parse(action) else {
            warn!(action = %action, "Unsupported action");
            return Dispatched::Dropped;
        };
        trace!(action = %action, id = ?frame.id, "Server request");

        match action {
            Action::Agents => {
                let mut reply = Frame::reply(action, frame.id);
                reply.agent_ids = Some(vec![self.name.clone()]);
                Dispatched::Reply(reply)
            }
            Action::ContainsAgent => {
                let mut reply = Frame::reply(action, frame.id);
                reply.answer = Some(frame.agent_id.as_deref() == Some(self.name.as_str()));
                Dispatched::Reply(reply)
            }
            Action::Services => {
                let mut reply = Frame::reply(action, frame.id);
                reply.services = Some(Vec::new());
                Dispatched::Reply(reply)
            }
            Action::AgentForService => Dispatched::Reply(Frame::reply(action, frame.id)),
            Action::AgentsForService => {
                let mut reply = Frame::reply(action, frame.id);
                reply.agent_ids = Some(Vec::new());
                Dispatched::Reply(reply)
            }
            Action::Send => self.deliver(frame),
            Action::Shutdown => {
                debug!("Shutdown requested by master container");
                Dispatched::Shutdown
            }
        }
    }

    fn resolve(&self, frame: Frame) -> Dispatched {
        let Some(id) = frame.id.clone() else {
            debug!("Dropping frame without action or id");
            return Dispatched::Dropped;
        };
        if self.pending.resolve(&id, frame) {
            Dispatched::Resolved
        } else {
            Dispatched::Dropped
        }
    }

    fn deliver(&self, frame: Frame) -> Dispatched {
        let Some(message) = frame.message else {
            warn!("Send action without message");
            return Dispatched::Dropped;
        };
        if !self.accepts(message.recipient()) {
            trace!(recipient = ?message.recipient(), "Message not addressed to this gateway");
            return Dispatched::Dropped;
        }
        // Some peers nest the map inside the message
        let map = frame.map.or_else(|| match message.get(MAP) {
            Some(Value::Object(map)) => Some(map.clone()),
            _ => None,
        });
        debug!(msg_id = ?message.msg_id(), msg_type = ?message.msg_type(), "Message delivered");
        self.inbox.append(Delivery { message, map });
        Dispatched::Delivered
    }

    fn accepts(&self, recipient: Option<&str>) -> bool {
        match recipient {
            Some(r) if r == self.name => true,
            Some(r) => match r.strip_prefix(TOPIC_PREFIX) {
                Some(topic) => self.subscriptions.contains(topic),
                None => false,
            },
            None => false,
        }
    }

    /// Ends the session: pending queries and blocked receives fail with
    /// `ConnectionClosed`.
    pub fn close(&self) {
        self.inbox.close();
        self.pending.close();
    }
}
