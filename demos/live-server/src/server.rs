//! Live-update server implementation.

use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use stonebeam_core::{ClientMessage, InboundMessage, MessageBody};
use tokio::net::TcpListener;
use tokio::sync::{RwLock, broadcast, watch};

/// How the socket endpoint behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketMode {
    /// Normal operation.
    #[default]
    Accept,
    /// Answer the upgrade with 503.
    Refuse,
    /// Accept, read the handshake, then drop the connection without a
    /// close frame.
    DropAfterHandshake,
    /// Accept, read the handshake, then close cleanly.
    CloseAfterHandshake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub socket: SocketMode,
    pub event_stream: bool,
    pub polling: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            socket: SocketMode::Accept,
            event_stream: true,
            polling: true,
        }
    }
}

/// Endpoints, as recorded in the hit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Socket,
    EventStream,
    Poll,
    UserAction,
}

/// Shared server state.
pub struct Backend {
    options: Options,
    socket_mode: RwLock<SocketMode>,
    kick: watch::Sender<u64>,
    log: RwLock<Vec<InboundMessage>>,
    next_id: AtomicI64,
    feed: broadcast::Sender<InboundMessage>,
    received: RwLock<Vec<ClientMessage>>,
    hits: RwLock<Vec<Endpoint>>,
    fail_polls: AtomicBool,
}

impl Backend {
    pub fn new(options: Options) -> Self {
        let (feed, _) = broadcast::channel(256);
        let (kick, _) = watch::channel(0);
        Self {
            socket_mode: RwLock::new(options.socket),
            kick,
            options,
            log: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            feed,
            received: RwLock::new(Vec::new()),
            hits: RwLock::new(Vec::new()),
            fail_polls: AtomicBool::new(false),
        }
    }

    /// Assign the next id, store the message for pollers and push it to
    /// live subscribers.
    pub async fn publish(&self, body: MessageBody) -> InboundMessage {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let msg = InboundMessage::new(body).with_id(id);
        self.log.write().await.push(msg.clone());
        let _ = self.feed.send(msg.clone());
        msg
    }

    /// Client messages received over the socket or the action endpoint.
    pub async fn received(&self) -> Vec<ClientMessage> {
        self.received.read().await.clone()
    }

    pub async fn hits(&self) -> Vec<Endpoint> {
        self.hits.read().await.clone()
    }

    /// Change how new socket connections are handled.
    pub async fn set_socket_mode(&self, mode: SocketMode) {
        *self.socket_mode.write().await = mode;
    }

    /// Drop every open socket without a close frame.
    pub fn drop_sockets(&self) {
        self.kick.send_modify(|n| *n += 1);
    }

    /// Make the polling endpoint answer 500 until switched back.
    pub fn set_fail_polls(&self, fail: bool) {
        self.fail_polls.store(fail, Ordering::SeqCst);
    }

    async fn hit(&self, endpoint: Endpoint) {
        self.hits.write().await.push(endpoint);
    }

    async fn record(&self, msg: ClientMessage) {
        self.received.write().await.push(msg);
    }
}

type AppState = Arc<Backend>;

pub fn router(backend: Arc<Backend>) -> Router {
    Router::new()
        .route("/api/live-updates", get(socket))
        .route("/api/live-updates-sse", get(event_stream))
        .route("/api/updates", get(poll))
        .route("/api/user-action", post(user_action))
        .route("/api/publish", post(publish))
        .with_state(backend)
}

/// Serve on an already bound listener until the process ends.
pub async fn serve(listener: TcpListener, backend: Arc<Backend>) -> anyhow::Result<()> {
    tracing::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(backend)).await?;
    Ok(())
}

/// Bind an ephemeral local port and serve in the background.
pub async fn spawn(options: Options) -> anyhow::Result<(SocketAddr, Arc<Backend>)> {
    let backend = Arc::new(Backend::new(options));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = backend.clone();
    tokio::spawn(async move {
        if let Err(e) = serve(listener, state).await {
            tracing::warn!("live server stopped: {}", e);
        }
    });
    Ok((addr, backend))
}

async fn socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    state.hit(Endpoint::Socket).await;
    let mode = *state.socket_mode.read().await;
    if mode == SocketMode::Refuse {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, mode))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, mode: SocketMode) {
    match mode {
        SocketMode::DropAfterHandshake | SocketMode::CloseAfterHandshake => {
            if let Ok(Some(Ok(msg))) =
                tokio::time::timeout(Duration::from_millis(200), socket.recv()).await
            {
                record_frame(&state, msg).await;
            }
            if mode == SocketMode::CloseAfterHandshake {
                let _ = socket.send(Message::Close(None)).await;
            }
            // Dropping the socket without a close frame is an unclean close.
            return;
        }
        SocketMode::Accept | SocketMode::Refuse => {}
    }

    let mut feed = state.feed.subscribe();
    let mut kick = state.kick.subscribe();
    loop {
        tokio::select! {
            _ = kick.changed() => {
                tracing::debug!("dropping socket without close frame");
                return;
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(msg)) => record_frame(&state, msg).await,
                    Some(Err(e)) => {
                        tracing::debug!("socket error: {}", e);
                        break;
                    }
                }
            }
            update = feed.recv() => {
                let msg = match update {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("socket client lagged by {} updates", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Ok(text) = serde_json::to_string(&msg) else { continue };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn record_frame(state: &Backend, msg: Message) {
    if let Message::Text(text) = msg {
        match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(msg) => state.record(msg).await,
            Err(e) => tracing::warn!("Invalid client message: {}", e),
        }
    }
}

async fn event_stream(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    state.hit(Endpoint::EventStream).await;
    if !state.options.event_stream {
        return Err(StatusCode::NOT_FOUND);
    }

    let feed = state.feed.subscribe();
    let updates = stream::unfold(feed, |mut feed| async move {
        loop {
            match feed.recv().await {
                Ok(msg) => {
                    let data = serde_json::to_string(&msg).unwrap_or_default();
                    return Some((Ok::<_, Infallible>(Event::default().data(data)), feed));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Ok(Sse::new(updates).keep_alive(KeepAlive::default()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollQuery {
    last_id: Option<i64>,
    user_id: Option<String>,
}

async fn poll(
    State(state): State<AppState>,
    Query(params): Query<PollQuery>,
) -> Result<Json<Vec<InboundMessage>>, StatusCode> {
    state.hit(Endpoint::Poll).await;
    if !state.options.polling || state.fail_polls.load(Ordering::SeqCst) {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let last_id = params.last_id.unwrap_or(0);
    tracing::debug!("poll from {:?} after {}", params.user_id, last_id);

    let log = state.log.read().await;
    let newer = log
        .iter()
        .filter(|m| m.id.is_some_and(|id| id > last_id))
        .cloned()
        .collect();
    Ok(Json(newer))
}

async fn user_action(State(state): State<AppState>, Json(msg): Json<ClientMessage>) -> StatusCode {
    state.hit(Endpoint::UserAction).await;
    match &msg {
        ClientMessage::UserAction { user_id, action, .. } => {
            tracing::info!("{} performed {}", user_id, action);
            state.record(msg).await;
            StatusCode::NO_CONTENT
        }
        _ => StatusCode::BAD_REQUEST,
    }
}

async fn publish(
    State(state): State<AppState>,
    Json(msg): Json<InboundMessage>,
) -> Json<InboundMessage> {
    let published = state.publish(msg.body).await;
    tracing::info!("Published update #{:?} ({})", published.id, published.kind());
    Json(published)
}
