//! Mock StoneBeam live-update backend.
//!
//! Serves the socket, push-stream, polling and user-action endpoints and
//! publishes a rotating set of sample updates.
//!
//! Run:
//!   cargo run -p stonebeam-live-server -- --port 8080 --every 3
//!
//! Then point the watcher at it:
//!   cargo run -p stonebeam-cli -- --base-url http://localhost:8080 --user u-1
//!
//! Push a custom update:
//!   curl -X POST localhost:8080/api/publish -H 'content-type: application/json' \
//!     -d '{"type":"order","action":"new","orderId":"ORD-77"}'

use std::time::Duration;
use stonebeam_core::{
    Action, DirectMessage, MessageBody, NotificationUpdate, OrderUpdate, QuotationUpdate,
    SystemNotice,
};
use stonebeam_live_server::{Backend, Options, serve};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("stonebeam_live_server=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port = parse_arg(&args, "--port").unwrap_or(8080);
    let every = parse_arg(&args, "--every").unwrap_or(5);

    let backend = std::sync::Arc::new(Backend::new(Options::default()));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;

    let feed = backend.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(every.max(1).into()));
        for body in sample_updates().into_iter().cycle() {
            ticker.tick().await;
            feed.publish(body).await;
        }
    });

    serve(listener, backend).await
}

fn sample_updates() -> Vec<MessageBody> {
    vec![
        MessageBody::Quotation(QuotationUpdate {
            action: Action::New,
            quotation_id: Some("Q-1001".into()),
            contractor_name: Some("Granite Works".into()),
            project_title: Some("Backyard patio".into()),
            price: Some(12_450.0),
        }),
        MessageBody::Order(OrderUpdate {
            action: Action::Updated,
            order_id: Some("ORD-2043".into()),
            status: Some("shipped".into()),
        }),
        MessageBody::Message(DirectMessage {
            action: Action::New,
            sender: Some("Ridge Stone Supply".into()),
            preview: Some("Your slabs are ready for pickup".into()),
        }),
        MessageBody::Notification(NotificationUpdate {
            action: Action::New,
            title: Some("Site visit scheduled".into()),
            message: Some("Thursday 9:00, 14 Elm St".into()),
        }),
        MessageBody::System(SystemNotice {
            action: Action::Unspecified,
            maintenance: None,
            announcement: Some("New dealers added in Concord and Nashua".into()),
        }),
    ]
}

fn parse_arg(args: &[String], flag: &str) -> Option<u16> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
