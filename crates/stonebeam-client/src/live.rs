//! The live-update service: transport negotiation, reconnection, heartbeat
//! and outbound actions.
//!
//! All connection state sits behind one async mutex. Every `connect()` runs
//! under a generation number; `disconnect()` bumps it, so work started by an
//! older generation (a slow attempt, a socket close, a scheduled reconnect)
//! is recognised as stale and discarded.

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::dispatch::{BoxError, Dispatcher, SubscriberId};
use crate::error::{ClientError, SendError};
use crate::session::CurrentUser;
use crate::transport::{self, Active, EventSender, TransportEvent};
use crate::ui::{StatusIndicator, UiSink};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use stonebeam_core::{
    ClientMessage, ConnectionStatus, InboundMessage, MessageKind, TransportKind, now_ms,
};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Lifecycle notifications, for observers and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    AttemptStarted(TransportKind),
    AttemptFailed(TransportKind),
    Connected(TransportKind),
    Disconnected,
    ReconnectScheduled { attempt: u32, delay: Duration },
    HeartbeatSent,
}

/// Page lifecycle signals the service reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    Online,
    Offline,
    Hidden,
    Visible,
    Unload,
}

struct ConnState {
    status: ConnectionStatus,
    transport: TransportKind,
    generation: u64,
    backoff: Backoff,
    active: Option<Active>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    visible: bool,
}

impl ConnState {
    /// Stop everything that is running. Leaves the generation alone.
    fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            active.shutdown();
        }
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
        if let Some(task) = self.reconnect.take() {
            task.abort();
        }
        self.status = ConnectionStatus::Disconnected;
        self.transport = TransportKind::None;
    }
}

struct Inner {
    config: ClientConfig,
    http: reqwest::Client,
    ui: Arc<dyn UiSink>,
    session: Arc<dyn CurrentUser>,
    dispatcher: Dispatcher,
    state: Mutex<ConnState>,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: broadcast::Sender<LinkEvent>,
    transport_tx: EventSender,
}

/// Handle to the live-update service. Cheap to clone.
#[derive(Clone)]
pub struct LiveUpdates {
    inner: Arc<Inner>,
}

impl LiveUpdates {
    /// Build the service and start its event loop. Must be called inside a
    /// Tokio runtime. Nothing connects until [`connect`](Self::connect).
    pub fn create(
        config: ClientConfig,
        ui: Arc<dyn UiSink>,
        session: Arc<dyn CurrentUser>,
    ) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (events_tx, _) = broadcast::channel(64);

        let backoff = Backoff::new(
            Duration::from_millis(config.reconnect_base_ms),
            Duration::from_millis(config.reconnect_cap_ms),
            config.max_reconnect_attempts,
        );
        let dispatcher = Dispatcher::new(
            ui.clone(),
            config.toast_duration(),
            config.banner_duration(),
        );

        let inner = Arc::new(Inner {
            config,
            http: reqwest::Client::new(),
            ui,
            session,
            dispatcher,
            state: Mutex::new(ConnState {
                status: ConnectionStatus::Disconnected,
                transport: TransportKind::None,
                generation: 0,
                backoff,
                active: None,
                heartbeat: None,
                reconnect: None,
                visible: true,
            }),
            status_tx,
            events_tx,
            transport_tx,
        });

        tokio::spawn(event_loop(Arc::downgrade(&inner), transport_rx));
        inner.ui.set_status(StatusIndicator::from(ConnectionStatus::Disconnected));

        Self { inner }
    }

    /// Disconnect and release the service.
    pub async fn dispose(self) {
        self.disconnect().await;
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn subscribe<F>(&self, kind: MessageKind, callback: F) -> SubscriberId
    where
        F: Fn(&InboundMessage) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(kind, callback)
    }

    pub fn unsubscribe(&self, kind: MessageKind, id: SubscriberId) -> bool {
        self.inner.dispatcher.unsubscribe(kind, id)
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.events_tx.subscribe()
    }

    pub async fn transport(&self) -> TransportKind {
        self.inner.state.lock().await.transport
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.status == ConnectionStatus::Connected
    }

    /// Pending reconnect delay and failures so far.
    pub async fn retry_state(&self) -> (Duration, u32) {
        let st = self.inner.state.lock().await;
        (st.backoff.current_delay(), st.backoff.retries())
    }

    /// Establish a transport, trying socket, then push stream, then polling.
    ///
    /// Attempts run one at a time. Polling always succeeds, so this only
    /// fails if a disconnect overtook the negotiation, one is already
    /// running, or the configuration is unusable.
    pub async fn connect(&self) -> Result<TransportKind, ClientError> {
        self.inner.config.validate()?;
        let generation = {
            let mut st = self.inner.state.lock().await;
            match st.status {
                ConnectionStatus::Connected => return Ok(st.transport),
                ConnectionStatus::Connecting => return Err(ClientError::AlreadyConnecting),
                ConnectionStatus::Disconnected => {}
            }
            if let Some(task) = st.reconnect.take() {
                task.abort();
            }
            st.status = ConnectionStatus::Connecting;
            st.generation
        };
        self.publish_status(ConnectionStatus::Connecting);

        for kind in [TransportKind::WebSocket, TransportKind::EventStream] {
            self.emit(LinkEvent::AttemptStarted(kind));
            match self.attempt(kind, generation).await {
                Ok(active) => return self.install(generation, active).await,
                Err(e) => {
                    tracing::warn!("{} transport unavailable: {}", kind, e);
                    self.emit(LinkEvent::AttemptFailed(kind));
                }
            }
            if self.inner.state.lock().await.generation != generation {
                return Err(ClientError::Superseded);
            }
        }

        self.emit(LinkEvent::AttemptStarted(TransportKind::Polling));
        let url = match self.inner.config.http_url(&self.inner.config.poll_path) {
            Ok(url) => url,
            Err(e) => {
                self.abandon(generation).await;
                return Err(e);
            }
        };
        let active = Active::Polling(transport::polling::start(
            self.inner.http.clone(),
            url,
            self.inner.config.poll_interval(),
            self.inner.dispatcher.watermark_handle(),
            self.inner.session.clone(),
            generation,
            self.inner.transport_tx.clone(),
        ));
        self.install(generation, active).await
    }

    /// Give up a negotiation that cannot reach any transport.
    async fn abandon(&self, generation: u64) {
        {
            let mut st = self.inner.state.lock().await;
            if st.generation != generation {
                return;
            }
            st.teardown();
        }
        self.publish_status(ConnectionStatus::Disconnected);
    }

    async fn attempt(&self, kind: TransportKind, generation: u64) -> Result<Active, ClientError> {
        let cfg = &self.inner.config;
        let events = self.inner.transport_tx.clone();
        match kind {
            TransportKind::WebSocket => {
                let url = cfg.socket_url()?;
                let user = self.inner.session.current_user();
                let fut = transport::websocket::connect(url.as_str(), user, generation, events);
                Ok(Active::WebSocket(with_timeout(cfg, fut).await?))
            }
            TransportKind::EventStream => {
                let url = cfg.http_url(&cfg.event_stream_path)?;
                let fut = transport::event_stream::connect(
                    &self.inner.http,
                    url.as_str(),
                    generation,
                    events,
                );
                Ok(Active::EventStream(with_timeout(cfg, fut).await?))
            }
            TransportKind::Polling | TransportKind::None => {
                unreachable!("polling is started directly, not attempted")
            }
        }
    }

    async fn install(&self, generation: u64, active: Active) -> Result<TransportKind, ClientError> {
        let kind = active.kind();
        {
            let mut st = self.inner.state.lock().await;
            if st.generation != generation {
                tracing::debug!("discarding {} established after disconnect", kind);
                active.shutdown();
                return Err(ClientError::Superseded);
            }
            if kind != TransportKind::Polling {
                st.backoff.reset();
            }
            st.status = ConnectionStatus::Connected;
            st.transport = kind;
            st.active = Some(active);
            if st.visible {
                st.heartbeat = Some(self.spawn_heartbeat(generation));
            }
        }
        tracing::info!("live updates connected via {}", kind);
        self.publish_status(ConnectionStatus::Connected);
        self.emit(LinkEvent::Connected(kind));
        Ok(kind)
    }

    /// Tear down whatever is running. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let was = {
            let mut st = self.inner.state.lock().await;
            st.generation += 1;
            let was = st.status;
            st.teardown();
            was
        };
        if was != ConnectionStatus::Disconnected {
            tracing::info!("live updates disconnected");
            self.publish_status(ConnectionStatus::Disconnected);
            self.emit(LinkEvent::Disconnected);
        }
    }

    pub async fn handle_page_event(&self, event: PageEvent) {
        match event {
            PageEvent::Online => {
                if let Err(e) = self.connect().await {
                    tracing::debug!("reconnect on online skipped: {}", e);
                }
            }
            PageEvent::Offline | PageEvent::Unload => self.disconnect().await,
            PageEvent::Hidden => {
                let mut st = self.inner.state.lock().await;
                st.visible = false;
                if let Some(task) = st.heartbeat.take() {
                    task.abort();
                }
            }
            PageEvent::Visible => {
                let mut st = self.inner.state.lock().await;
                st.visible = true;
                if st.status == ConnectionStatus::Connected && st.heartbeat.is_none() {
                    let generation = st.generation;
                    st.heartbeat = Some(self.spawn_heartbeat(generation));
                }
            }
        }
    }

    /// Report a user action to the server.
    ///
    /// Goes over the socket when that is the active transport, otherwise as
    /// an HTTP POST. Never retried.
    pub async fn send_user_action(
        &self,
        action: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<(), SendError> {
        let st = self.inner.state.lock().await;
        if st.status != ConnectionStatus::Connected {
            tracing::warn!("not connected, dropping user action");
            return Err(SendError::NotConnected);
        }
        let Some(user_id) = self.inner.session.current_user() else {
            return Err(SendError::NoUser);
        };
        let msg = ClientMessage::UserAction {
            user_id,
            action: action.into(),
            data,
            timestamp: now_ms(),
        };

        if let Some(Active::WebSocket(socket)) = &st.active {
            return socket.send(&msg).inspect_err(|e| {
                tracing::warn!("failed to send user action: {}", e);
            });
        }
        drop(st);

        let result = self.post_action(&msg).await;
        if let Err(e) = &result {
            tracing::warn!("failed to send user action: {}", e);
        }
        result
    }

    async fn post_action(&self, msg: &ClientMessage) -> Result<(), SendError> {
        let cfg = &self.inner.config;
        let url = cfg
            .http_url(&cfg.action_path)
            .map_err(|_| SendError::InvalidUrl(cfg.base_url.clone()))?;
        let response = self.inner.http.post(url).json(msg).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SendError::Status(status));
        }
        Ok(())
    }

    fn spawn_heartbeat(&self, generation: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.heartbeat_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                LiveUpdates { inner }.send_heartbeat(generation).await;
            }
        })
    }

    async fn send_heartbeat(&self, generation: u64) {
        let st = self.inner.state.lock().await;
        if st.generation != generation || st.status != ConnectionStatus::Connected {
            return;
        }
        // Only the socket has an upstream direction.
        if let Some(Active::WebSocket(socket)) = &st.active {
            let beat = ClientMessage::Heartbeat { timestamp: now_ms() };
            match socket.send(&beat) {
                Ok(()) => self.emit(LinkEvent::HeartbeatSent),
                Err(e) => tracing::debug!("heartbeat not sent: {}", e),
            }
        }
    }

    async fn on_transport_event(&self, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Message(msg) => {
                if self.inner.state.lock().await.generation != generation {
                    return;
                }
                self.inner.dispatcher.dispatch(&msg);
            }
            TransportEvent::Closed { clean } => self.on_closed(generation, clean).await,
        }
    }

    async fn on_closed(&self, generation: u64, clean: bool) {
        let mut st = self.inner.state.lock().await;
        if st.generation != generation || st.active.is_none() {
            return;
        }
        let kind = st.transport;
        st.teardown();

        let retry = if kind == TransportKind::WebSocket && !clean {
            match st.backoff.next_delay() {
                Some(delay) => {
                    let attempt = st.backoff.retries();
                    st.reconnect = Some(self.spawn_reconnect(generation, delay));
                    Some((attempt, delay))
                }
                None => {
                    tracing::warn!("socket lost, giving up after {} retries", st.backoff.retries());
                    None
                }
            }
        } else {
            None
        };
        drop(st);

        tracing::info!("{} transport closed (clean: {})", kind, clean);
        self.publish_status(ConnectionStatus::Disconnected);
        self.emit(LinkEvent::Disconnected);
        if let Some((attempt, delay)) = retry {
            tracing::info!("reconnecting in {:?} (attempt {})", delay, attempt);
            self.emit(LinkEvent::ReconnectScheduled { attempt, delay });
        }
    }

    fn spawn_reconnect(&self, generation: u64, delay: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            LiveUpdates { inner }.reconnect(generation).await;
        })
    }

    /// Retry the socket alone. A failed retry counts against the backoff and
    /// schedules the next one; once the retries are spent, the full
    /// negotiation runs instead.
    async fn reconnect(&self, generation: u64) {
        {
            let mut st = self.inner.state.lock().await;
            if st.generation != generation || st.status != ConnectionStatus::Disconnected {
                return;
            }
            // Detach ourselves so the fallback connect() does not abort this task.
            st.reconnect = None;
            st.status = ConnectionStatus::Connecting;
        }
        self.publish_status(ConnectionStatus::Connecting);

        self.emit(LinkEvent::AttemptStarted(TransportKind::WebSocket));
        let err = match self.attempt(TransportKind::WebSocket, generation).await {
            Ok(active) => {
                if let Err(e) = self.install(generation, active).await {
                    tracing::debug!("socket reconnect discarded: {}", e);
                }
                return;
            }
            Err(e) => e,
        };
        tracing::warn!("socket reconnect failed: {}", err);
        self.emit(LinkEvent::AttemptFailed(TransportKind::WebSocket));

        let retry = {
            let mut st = self.inner.state.lock().await;
            if st.generation != generation {
                return;
            }
            st.status = ConnectionStatus::Disconnected;
            match st.backoff.next_delay() {
                Some(delay) => {
                    let attempt = st.backoff.retries();
                    st.reconnect = Some(self.spawn_reconnect(generation, delay));
                    Some((attempt, delay))
                }
                None => None,
            }
        };
        self.publish_status(ConnectionStatus::Disconnected);

        match retry {
            Some((attempt, delay)) => {
                tracing::info!("reconnecting in {:?} (attempt {})", delay, attempt);
                self.emit(LinkEvent::ReconnectScheduled { attempt, delay });
            }
            None => {
                tracing::warn!("socket still unreachable, falling back to other transports");
                if let Err(e) = self.connect().await {
                    tracing::debug!("fallback negotiation did not run: {}", e);
                }
            }
        }
    }

    fn publish_status(&self, status: ConnectionStatus) {
        self.inner.status_tx.send_replace(status);
        self.inner.ui.set_status(StatusIndicator::from(status));
    }

    fn emit(&self, event: LinkEvent) {
        let _ = self.inner.events_tx.send(event);
    }
}

async fn with_timeout<T>(
    cfg: &ClientConfig,
    fut: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, ClientError> {
    match cfg.connect_timeout() {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ClientError::Timeout)?,
        None => fut.await,
    }
}

/// Applies transport events in arrival order. Ends once the service is gone.
async fn event_loop(weak: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>) {
    while let Some((generation, event)) = rx.recv().await {
        let Some(inner) = weak.upgrade() else { break };
        LiveUpdates { inner }.on_transport_event(generation, event).await;
    }
}
