//! Server push stream transport.

use super::{EventSender, TransportEvent};
use crate::error::ClientError;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use stonebeam_core::InboundMessage;
use tokio::task::JoinHandle;

pub(crate) struct StreamHandle {
    reader: JoinHandle<()>,
}

impl StreamHandle {
    pub(crate) fn shutdown(self) {
        self.reader.abort();
    }
}

/// Open the stream. Fails unless the server answers with a success status.
///
/// Once open, a stream error ends the transport; it does not reconnect.
pub(crate) async fn connect(
    http: &reqwest::Client,
    url: &str,
    generation: u64,
    events: EventSender,
) -> Result<StreamHandle, ClientError> {
    let response = http
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Status(status));
    }

    let mut stream = Box::pin(response.bytes_stream().eventsource());
    let reader = tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("event stream error: {}", e);
                    break;
                }
            };
            if event.data.trim().is_empty() {
                continue;
            }
            match InboundMessage::from_json(&event.data) {
                Ok(msg) => {
                    if events.send((generation, TransportEvent::Message(msg))).is_err() {
                        return;
                    }
                }
                Err(e) => tracing::warn!("invalid stream event: {}", e),
            }
        }
        let _ = events.send((generation, TransportEvent::Closed { clean: false }));
    });

    Ok(StreamHandle { reader })
}
