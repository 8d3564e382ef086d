//! Persistent socket transport.

use super::{EventSender, TransportEvent};
use crate::error::{ClientError, SendError};
use futures_util::{SinkExt, StreamExt};
use stonebeam_core::{ClientMessage, InboundMessage, UserId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

pub(crate) struct SocketHandle {
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    _writer: JoinHandle<()>,
}

impl SocketHandle {
    pub(crate) fn send(&self, msg: &ClientMessage) -> Result<(), SendError> {
        let text = serde_json::to_string(msg)?;
        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| SendError::SocketClosed)
    }

    /// Close the socket. The writer exits after sending the Close frame.
    pub(crate) fn shutdown(self) {
        self.reader.abort();
        let _ = self.outbound.send(Message::Close(None));
    }
}

/// Open the socket and send the subscription handshake.
pub(crate) async fn connect(
    url: &str,
    user: Option<UserId>,
    generation: u64,
    events: EventSender,
) -> Result<SocketHandle, ClientError> {
    let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();

    match user {
        Some(user_id) => {
            let hello = serde_json::to_string(&ClientMessage::subscribe(user_id))?;
            sink.send(Message::Text(hello.into())).await?;
        }
        None => tracing::debug!("no signed-in user, skipping subscription handshake"),
    }

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = sink.send(msg).await {
                tracing::debug!("socket write failed: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader = tokio::spawn(async move {
        let clean = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match InboundMessage::from_json(text.as_str()) {
                    Ok(msg) => {
                        if events.send((generation, TransportEvent::Message(msg))).is_err() {
                            return;
                        }
                    }
                    Err(e) => tracing::warn!("invalid socket message: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!("socket closed by server: {:?}", frame);
                    break true;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("socket error: {}", e);
                    break false;
                }
                None => break false,
            }
        };
        let _ = events.send((generation, TransportEvent::Closed { clean }));
    });

    Ok(SocketHandle {
        outbound,
        reader,
        _writer: writer,
    })
}
