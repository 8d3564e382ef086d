//! The three update transports, in fallback order.
//!
//! Each transport decodes frames into [`InboundMessage`]s at its own boundary
//! and forwards them, tagged with the generation that started it, to the
//! service's event loop.

pub(crate) mod event_stream;
pub(crate) mod polling;
pub(crate) mod websocket;

use stonebeam_core::{InboundMessage, TransportKind};
use tokio::sync::mpsc;

/// What a running transport reports back.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    Message(InboundMessage),
    /// The transport stopped on its own. `clean` is true only when the peer
    /// closed the socket deliberately.
    Closed { clean: bool },
}

pub(crate) type EventSender = mpsc::UnboundedSender<(u64, TransportEvent)>;

/// The single live transport.
pub(crate) enum Active {
    WebSocket(websocket::SocketHandle),
    EventStream(event_stream::StreamHandle),
    Polling(polling::PollHandle),
}

impl Active {
    pub(crate) fn kind(&self) -> TransportKind {
        match self {
            Self::WebSocket(_) => TransportKind::WebSocket,
            Self::EventStream(_) => TransportKind::EventStream,
            Self::Polling(_) => TransportKind::Polling,
        }
    }

    /// Stop the transport's tasks and release the connection.
    pub(crate) fn shutdown(self) {
        match self {
            Self::WebSocket(h) => h.shutdown(),
            Self::EventStream(h) => h.shutdown(),
            Self::Polling(h) => h.shutdown(),
        }
    }
}
