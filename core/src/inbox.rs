use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::Notify;
use tracing::trace;

use crate::codec::Envelope;
use crate::message::{local_type_name, MessageType};
use crate::timeout::Timeout;
use crate::{Result, ShuttleError};

/// A message accepted for this gateway, with the map from its send frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message: Envelope,
    pub map: Option<Map<String, Value>>,
}

impl Delivery {
    pub fn new(message: Envelope) -> Self {
        Self { message, map: None }
    }
}

/// Selects which queued message a receive may take.
pub enum Filter {
    /// Most recently arrived message.
    Any,
    /// Oldest message answering the given message id.
    InReplyTo(String),
    /// Oldest message whose type tag ends in the given local name.
    Type(String),
    /// Oldest message the predicate accepts.
    Predicate(Box<dyn Fn(&Envelope) -> bool + Send + Sync>),
}

impl Filter {
    pub fn reply_to(msg: &impl MessageType) -> Self {
        Self::InReplyTo(msg.header().msg_id().to_string())
    }

    pub fn of_type<M: MessageType>() -> Self {
        Self::Type(local_type_name(M::TYPE_TAG).to_string())
    }

    /// Oldest message of type `M` whose attributes decode as `M`. Messages
    /// with the right tag but unusable attributes stay queued.
    pub fn decodable_as<M: MessageType>() -> Self {
        let name = local_type_name(M::TYPE_TAG);
        Self::matching(move |env| env.type_name() == Some(name) && env.decode::<M>().is_ok())
    }

    pub fn matching<F>(f: F) -> Self
    where
        F: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Box::new(f))
    }

    fn accepts(&self, env: &Envelope) -> bool {
        match self {
            Filter::Any => true,
            Filter::InReplyTo(id) => env.in_reply_to() == Some(id.as_str()),
            Filter::Type(name) => env.type_name() == Some(local_type_name(name)),
            Filter::Predicate(f) => f(env),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::Any
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Any => f.write_str("Any"),
            Filter::InReplyTo(id) => f.debug_tuple("InReplyTo").field(id).finish(),
            Filter::Type(name) => f.debug_tuple("Type").field(name).finish(),
            Filter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

#[derive(Default)]
struct InboxState {
    entries: Vec<Delivery>,
    closed: bool,
}

/// Messages delivered to the gateway and not yet received.
///
/// Arrival order is kept. An unfiltered receive takes the newest entry;
/// filtered receives take the oldest match. Waiters are woken on every
/// append and when the inbox closes.
#[derive(Default)]
pub struct Inbox {
    state: Mutex<InboxState>,
    arrived: Notify,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, delivery: Delivery) {
        {
            let mut state = self.lock();
            if state.closed {
                trace!("Inbox closed, dropping delivery");
                return;
            }
            state.entries.push(delivery);
        }
        self.arrived.notify_waiters();
    }

    /// Marks the inbox closed and wakes every waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.arrived.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn take(&self, filter: &Filter) -> (Option<Delivery>, bool) {
        let mut state = self.lock();
        let pos = match filter {
            Filter::Any => state.entries.len().checked_sub(1),
            _ => state.entries.iter().position(|d| filter.accepts(&d.message)),
        };
        (pos.map(|i| state.entries.remove(i)), state.closed)
    }

    /// Removes and returns the first message `filter` selects, waiting up to
    /// `timeout` for one to arrive.
    ///
    /// Returns `Ok(None)` when the wait ends without a match and
    /// [`ShuttleError::ConnectionClosed`] once the inbox is closed and
    /// nothing queued matches.
    pub async fn retrieve(&self, filter: &Filter, timeout: Timeout) -> Result<Option<Delivery>> {
        let deadline = timeout.deadline();
        let mut expired = false;
        loop {
            // Register interest before scanning so an append between the scan
            // and the wait is not missed.
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (found, closed) = self.take(filter);
            if found.is_some() {
                return Ok(found);
            }
            if closed {
                return Err(ShuttleError::ConnectionClosed);
            }
            if expired || timeout == Timeout::NonBlocking {
                return Ok(None);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        expired = true;
                    }
                }
                None => notified.await,
            }
        }
    }
}

impl fmt::Debug for Inbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Inbox")
            .field("len", &state.entries.len())
            .field("closed", &state.closed)
            .finish()
    }
}
