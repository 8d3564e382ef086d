//! Core types for StoneBeam live updates.
//!
//! This crate holds the wire vocabulary shared by the client runtime and any
//! backend: inbound update messages, outbound client messages and the
//! connection state enums. It performs no I/O.

mod inbound;
mod outbound;
mod user;

pub use inbound::{
    Action, DirectMessage, InboundMessage, MessageBody, MessageKind, NotificationUpdate,
    OrderUpdate, QuotationUpdate, SystemNotice,
};
pub use outbound::{Channel, ClientMessage};
pub use user::{Role, UserId, UserIdParseError};

use std::fmt;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Transport currently carrying updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    #[default]
    None,
    /// Persistent bidirectional socket.
    WebSocket,
    /// Server-to-client push stream.
    EventStream,
    /// Periodic REST polling, the terminal fallback.
    Polling,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::WebSocket => "websocket",
            Self::EventStream => "event-stream",
            Self::Polling => "polling",
        })
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
