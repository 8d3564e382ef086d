//! Polling transport, the terminal fallback.

use super::{EventSender, TransportEvent};
use crate::dispatch::Watermark;
use crate::error::ClientError;
use crate::session::CurrentUser;
use std::sync::Arc;
use std::time::Duration;
use stonebeam_core::{InboundMessage, UserId};
use reqwest::Url;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub(crate) struct PollHandle {
    ticker: JoinHandle<()>,
}

impl PollHandle {
    pub(crate) fn shutdown(self) {
        self.ticker.abort();
    }
}

/// Start polling. The first request goes out immediately; a failed request
/// is simply retried on the next tick.
pub(crate) fn start(
    http: reqwest::Client,
    url: Url,
    interval: Duration,
    watermark: Arc<Watermark>,
    session: Arc<dyn CurrentUser>,
    generation: u64,
    events: EventSender,
) -> PollHandle {
    let ticker = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let user = session.current_user();
            match fetch(&http, &url, watermark.get(), user.as_ref()).await {
                Ok(batch) => {
                    for msg in batch {
                        if events.send((generation, TransportEvent::Message(msg))).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => tracing::warn!("polling for updates failed: {}", e),
            }
        }
    });
    PollHandle { ticker }
}

async fn fetch(
    http: &reqwest::Client,
    url: &Url,
    last_id: i64,
    user: Option<&UserId>,
) -> Result<Vec<InboundMessage>, ClientError> {
    let mut query = vec![("lastId", last_id.to_string())];
    if let Some(user) = user {
        query.push(("userId", user.to_string()));
    }
    let response = http.get(url.clone()).query(&query).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Status(status));
    }
    Ok(response.json().await?)
}
