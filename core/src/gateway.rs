use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent_id::{AgentId, IntoTopic};
use crate::codec::{self, MessageRegistry, Received};
use crate::config::GatewayConfig;
use crate::connection::{self, FrameWriter};
use crate::dispatcher::Dispatcher;
use crate::inbox::{Delivery, Filter, Inbox};
use crate::message::MessageType;
use crate::pending::PendingRequests;
use crate::protocol::{Action, Frame};
use crate::subscriptions::Subscriptions;
use crate::timeout::Timeout;
use crate::{Result, ShuttleError};

/// Client connection to a master container, acting as one agent on the bus.
///
/// A background task reads the socket, answers directory requests from the
/// master and queues messages addressed to this gateway or to a subscribed
/// topic. Every method takes `&self`, so a gateway can be shared behind an
/// `Arc` between tasks.
///
/// # Examples
///
/// ```no_run
/// use shuttle_core::{AgentId, Filter, Gateway, Message, Performative, Timeout};
///
/// # async fn run() -> shuttle_core::Result<()> {
/// let gw = Gateway::connect("localhost", 1100, Some("sonar")).await?;
/// if let Some(shell) = gw.agent_for_service("org.arl.fjage.shell.Services.SHELL", None).await? {
///     let mut ping = Message::new(Performative::Request, shell);
///     let _rsp = gw.request(&mut ping, Timeout::millis(2000)).await?;
/// }
/// gw.subscribe(AgentId::new("nav"));
/// while let Some(ntf) = gw.receive(Filter::Any, Timeout::millis(500)).await? {
///     println!("{ntf:?}");
/// }
/// gw.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Gateway {
    name: String,
    writer: Arc<FrameWriter>,
    inbox: Arc<Inbox>,
    pending: Arc<PendingRequests>,
    subscriptions: Arc<Subscriptions>,
    registry: MessageRegistry,
    default_timeout: Timeout,
    reader: JoinHandle<()>,
    shut_down: AtomicBool,
}

impl Gateway {
    /// Connects to `host:port` under `name`, or a generated name when `None`.
    pub async fn connect(host: &str, port: u16, name: Option<&str>) -> Result<Self> {
        let mut config = GatewayConfig::new(host, port);
        config.name = name.map(str::to_string);
        Self::connect_with(config).await
    }

    pub async fn connect_with(config: GatewayConfig) -> Result<Self> {
        Self::connect_with_registry(config, MessageRegistry::with_builtins()).await
    }

    /// Connects with an application registry for decoding received messages.
    ///
    /// Fails if the master cannot be reached, if another agent already uses
    /// the name, or if the master does not answer the name check in time.
    pub async fn connect_with_registry(
        config: GatewayConfig,
        registry: MessageRegistry,
    ) -> Result<Self> {
        let name = config.agent_name();
        let (read, writer) = connection::open(&config.host, config.port).await?;
        let writer = Arc::new(writer);

        let inbox = Arc::new(Inbox::new());
        let pending = Arc::new(PendingRequests::new());
        let subscriptions = Arc::new(Subscriptions::new());
        let dispatcher = Dispatcher::new(
            name.clone(),
            Arc::clone(&subscriptions),
            Arc::clone(&inbox),
            Arc::clone(&pending),
        );
        let reader = connection::spawn_reader(
            read,
            config.max_frame_bytes,
            dispatcher,
            Arc::clone(&writer),
        );

        let gateway = Self {
            name,
            writer,
            inbox,
            pending,
            subscriptions,
            registry,
            default_timeout: config.default_timeout(),
            reader,
            shut_down: AtomicBool::new(false),
        };
        gateway
            .check_duplicate(Timeout::from(config.handshake_timeout()))
            .await?;
        info!(name = %gateway.name, peer = %gateway.peer_addr(), "Gateway joined bus");
        Ok(gateway)
    }

    /// Asks the master whether the name is taken. Anything but a clear
    /// "no" aborts construction.
    async fn check_duplicate(&self, timeout: Timeout) -> Result<()> {
        let mut frame = Frame::request(Action::ContainsAgent);
        frame.agent_id = Some(self.name.clone());
        match self.query(frame, timeout).await? {
            Some(rsp) if rsp.answer == Some(false) => Ok(()),
            Some(_) => {
                warn!(name = %self.name, "Agent name already in use on the bus");
                Err(ShuttleError::DuplicateAgent(self.name.clone()))
            }
            None => {
                warn!(name = %self.name, "No answer to duplicate name check");
                Err(ShuttleError::HandshakeTimeout(self.name.clone()))
            }
        }
    }

    /// Sends a correlated request frame and waits for its answer.
    async fn query(&self, mut frame: Frame, timeout: Timeout) -> Result<Option<Frame>> {
        let id = uuid::Uuid::new_v4().to_string();
        frame.id = Some(id.clone());
        let reply = self.pending.register(id)?;
        self.write(&frame).await?;
        reply.wait(timeout).await
    }

    async fn write(&self, frame: &Frame) -> Result<()> {
        if self.is_closed() {
            return Err(ShuttleError::ConnectionClosed);
        }
        match self.writer.write(frame).await {
            Err(ShuttleError::IoError(e)) => {
                warn!(name = %self.name, error = %e, "Write failed, closing session");
                self.close_session();
                Err(ShuttleError::IoError(e))
            }
            other => other,
        }
    }

    fn close_session(&self) {
        self.inbox.close();
        self.pending.close();
        self.reader.abort();
    }

    /// Sends `msg`, stamping this gateway as its sender.
    ///
    /// The message must have a recipient. A generic message's map travels
    /// as a sibling of the message in the send frame.
    pub async fn send<M: MessageType>(&self, msg: &mut M) -> Result<()> {
        let header = msg.header_mut();
        if header.recipient.is_none() {
            return Err(ShuttleError::NoRecipient);
        }
        header.sender = Some(AgentId::new(self.name.as_str()));
        let envelope = codec::encode(&*msg)?;
        let map = msg.payload_map().cloned();
        debug!(
            msg_id = %msg.header().msg_id(),
            msg_type = M::TYPE_TAG,
            recipient = ?envelope.recipient(),
            "Sending message"
        );
        self.write(&Frame::send(envelope, map)).await
    }

    /// Takes a queued message selected by `filter`, waiting up to `timeout`.
    ///
    /// `Ok(None)` means nothing matched in time.
    pub async fn receive(&self, filter: Filter, timeout: Timeout) -> Result<Option<Received>> {
        let delivery = self.inbox.retrieve(&filter, timeout).await?;
        Ok(delivery.map(|d| self.registry.decode(d)))
    }

    /// Like [`receive`](Self::receive) without decoding.
    pub async fn receive_raw(&self, filter: Filter, timeout: Timeout) -> Result<Option<Delivery>> {
        self.inbox.retrieve(&filter, timeout).await
    }

    pub async fn try_receive(&self, filter: Filter) -> Result<Option<Received>> {
        self.receive(filter, Timeout::NonBlocking).await
    }

    /// Takes the oldest queued message of type `M`.
    ///
    /// A message tagged `M` whose attributes do not decode as `M` is left in
    /// the inbox for [`receive`](Self::receive) or
    /// [`receive_raw`](Self::receive_raw).
    pub async fn receive_as<M: MessageType>(&self, timeout: Timeout) -> Result<Option<M>> {
        let filter = Filter::decodable_as::<M>();
        let Some(Delivery { message, map }) = self.inbox.retrieve(&filter, timeout).await? else {
            return Ok(None);
        };
        Ok(Some(codec::decode_typed(&message, map)?))
    }

    /// Sends `msg` and waits for the message answering it.
    pub async fn request<M: MessageType>(
        &self,
        msg: &mut M,
        timeout: impl Into<Option<Timeout>>,
    ) -> Result<Option<Received>> {
        let timeout = timeout.into().unwrap_or(self.default_timeout);
        self.send(msg).await?;
        self.receive(Filter::reply_to(&*msg), timeout).await
    }

    /// Canonical topic for a name, an agent or a topic.
    pub fn topic(topic: impl IntoTopic) -> AgentId {
        topic.into_topic()
    }

    /// Starts accepting messages published to the topic. Returns false if
    /// already subscribed.
    pub fn subscribe(&self, topic: impl IntoTopic) -> bool {
        self.subscriptions.subscribe(topic)
    }

    pub fn unsubscribe(&self, topic: impl IntoTopic) -> bool {
        self.subscriptions.unsubscribe(topic)
    }

    /// Looks up one agent providing `service`. `None` for the timeout uses
    /// the configured default.
    pub async fn agent_for_service(
        &self,
        service: &str,
        timeout: impl Into<Option<Timeout>>,
    ) -> Result<Option<AgentId>> {
        let timeout = timeout.into().unwrap_or(self.default_timeout);
        let mut frame = Frame::request(Action::AgentForService);
        frame.service = Some(service.to_string());
        let rsp = self.query(frame, timeout).await?;
        Ok(rsp
            .and_then(|f| f.agent_id)
            .filter(|id| !id.is_empty())
            .map(|id| AgentId::from_wire(&id)))
    }

    /// Looks up every agent providing `service`; empty on timeout.
    pub async fn agents_for_service(
        &self,
        service: &str,
        timeout: impl Into<Option<Timeout>>,
    ) -> Result<Vec<AgentId>> {
        let timeout = timeout.into().unwrap_or(self.default_timeout);
        let mut frame = Frame::request(Action::AgentsForService);
        frame.service = Some(service.to_string());
        let rsp = self.query(frame, timeout).await?;
        Ok(rsp
            .and_then(|f| f.agent_ids)
            .unwrap_or_default()
            .iter()
            .map(|id| AgentId::from_wire(id))
            .collect())
    }

    /// Asks the master container to shut down, then ends the session.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Ok(());
        }
        if !self.is_closed() {
            if let Err(e) = self.writer.write(&Frame::shutdown()).await {
                debug!(error = %e, "Could not send shutdown");
            }
        }
        self.close().await;
        Ok(())
    }

    /// Leaves the bus without affecting the master container.
    pub async fn close(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.is_closed() {
            if let Err(e) = self.writer.close().await {
                debug!(error = %e, "Could not close socket");
            }
        }
        self.close_session();
        info!(name = %self.name, "Gateway closed");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// This gateway as an agent identifier.
    pub fn agent_id(&self) -> AgentId {
        AgentId::new(self.name.as_str())
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.writer.peer()
    }

    /// True once the reader stopped or the session was shut down.
    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }

    pub fn default_timeout(&self) -> Timeout {
        self.default_timeout
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.topics()
    }

    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    /// Messages queued and not yet received.
    pub fn pending_messages(&self) -> usize {
        self.inbox.len()
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("name", &self.name)
            .field("peer", &self.writer.peer())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
