//! Error types.

use reqwest::StatusCode;

/// Failure to establish or run a transport.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid base url: {0}")]
    InvalidUrl(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {0}")]
    Status(StatusCode),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("connection attempt timed out")]
    Timeout,
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,
    #[error("connection attempt superseded by a disconnect")]
    Superseded,
}

/// Failure to deliver a user action.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
    #[error("no signed-in user")]
    NoUser,
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid base url: {0}")]
    InvalidUrl(String),
    #[error("socket writer has stopped")]
    SocketClosed,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected action: {0}")]
    Status(StatusCode),
}
