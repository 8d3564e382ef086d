#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use stonebeam_client::{ClientConfig, LinkEvent, LiveUpdates, MemoryUi};
use stonebeam_core::{InboundMessage, MessageKind, UserId};
use tokio::sync::{broadcast, mpsc};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn config(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        poll_interval_ms: 50,
        ..ClientConfig::default().with_base_url(format!("http://{addr}"))
    }
}

pub fn user() -> UserId {
    UserId::new("u-1042").unwrap()
}

pub fn client(config: ClientConfig, ui: Arc<MemoryUi>) -> LiveUpdates {
    LiveUpdates::create(config, ui, Arc::new(user()))
}

/// Wait for the first event matching `pred`, collecting everything seen.
pub async fn wait_for(
    events: &mut broadcast::Receiver<LinkEvent>,
    pred: impl Fn(&LinkEvent) -> bool,
) -> Vec<LinkEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            let done = pred(&event);
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out; saw {seen:?}"));
    seen
}

/// Forward every message of `kind` into a channel.
pub fn tap(live: &LiveUpdates, kind: MessageKind) -> mpsc::UnboundedReceiver<InboundMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    live.subscribe(kind, move |msg| {
        let _ = tx.send(msg.clone());
        Ok(())
    });
    rx
}

pub async fn next(rx: &mut mpsc::UnboundedReceiver<InboundMessage>) -> InboundMessage {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("subscriber channel closed")
}
