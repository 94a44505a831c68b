use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::protocol::Frame;
use crate::timeout::Timeout;
use crate::{Result, ShuttleError};

/// Outstanding queries keyed by correlation id.
///
/// An entry lives from [`register`](Self::register) until its answer is
/// resolved, its [`PendingReply`] is dropped, or the table closes.
#[derive(Debug, Default)]
pub struct PendingRequests {
    slots: DashMap<String, oneshot::Sender<Frame>>,
    closed: AtomicBool,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a slot for `id`. Register before writing the query so a fast
    /// answer always finds it.
    pub fn register(self: &Arc<Self>, id: impl Into<String>) -> Result<PendingReply> {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        self.slots.insert(id.clone(), tx);
        // close() may have cleared the table between the insert and here
        if self.closed.load(Ordering::Acquire) {
            self.slots.remove(&id);
            return Err(ShuttleError::ConnectionClosed);
        }
        trace!(id = %id, "Registered pending request");
        Ok(PendingReply {
            id,
            rx,
            table: Arc::clone(self),
        })
    }

    /// Hands `frame` to the waiter registered under `id`.
    ///
    /// Returns false when nobody is waiting, e.g. the answer came after the
    /// waiter gave up.
    pub fn resolve(&self, id: &str, frame: Frame) -> bool {
        match self.slots.remove(id) {
            Some((_, tx)) => tx.send(frame).is_ok(),
            None => {
                debug!(id = %id, "No pending request for answer");
                false
            }
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        self.slots.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fails every waiter with [`ShuttleError::ConnectionClosed`] and refuses
    /// new registrations.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.slots.clear();
    }
}

/// Receiving side of one registered query.
#[derive(Debug)]
pub struct PendingReply {
    id: String,
    rx: oneshot::Receiver<Frame>,
    table: Arc<PendingRequests>,
}

impl PendingReply {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the answer. `Ok(None)` means the timeout elapsed first.
    pub async fn wait(mut self, timeout: Timeout) -> Result<Option<Frame>> {
        match timeout {
            Timeout::NonBlocking => match self.rx.try_recv() {
                Ok(frame) => Ok(Some(frame)),
                Err(oneshot::error::TryRecvError::Empty) => Ok(None),
                Err(oneshot::error::TryRecvError::Closed) => Err(ShuttleError::ConnectionClosed),
            },
            Timeout::Blocking => (&mut self.rx)
                .await
                .map(Some)
                .map_err(|_| ShuttleError::ConnectionClosed),
            Timeout::After(d) => match tokio::time::timeout(d, &mut self.rx).await {
                Ok(Ok(frame)) => Ok(Some(frame)),
                Ok(Err(_)) => Err(ShuttleError::ConnectionClosed),
                Err(_) => {
                    debug!(id = %self.id, timeout_ms = d.as_millis() as u64, "Query timed out");
                    Ok(None)
                }
            },
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}
