//! Terminal watcher for StoneBeam live updates.
//!
//! Connects to a backend, renders every update to the log and keeps the
//! connection alive until Ctrl-C.
//!
//!   stonebeam --base-url http://localhost:8080 --user u-1
//!   stonebeam --config stonebeam.toml --action acceptQuote --data '{"quotationId":"Q-1001"}'

mod settings;

use anyhow::Context;
use clap::Parser;
use settings::Settings;
use std::path::PathBuf;
use std::sync::Arc;
use stonebeam_client::{LinkEvent, LiveUpdates, PageEvent, TracingUi};
use stonebeam_core::{MessageKind, UserId};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "stonebeam", about = "Watch StoneBeam live updates")]
struct Cli {
    /// TOML config file.
    #[arg(short, long, env = "STONEBEAM_CONFIG")]
    config: Option<PathBuf>,

    /// Backend origin, overrides the config file.
    #[arg(long, env = "STONEBEAM_BASE_URL")]
    base_url: Option<String>,

    /// Signed-in user id, overrides the config file.
    #[arg(short, long, env = "STONEBEAM_USER")]
    user: Option<String>,

    /// Send this user action once connected.
    #[arg(long)]
    action: Option<String>,

    /// JSON payload for --action.
    #[arg(long, default_value = "{}", requires = "action")]
    data: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("stonebeam=info".parse()?))
        .init();

    let cli = Cli::parse();
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(base_url) = cli.base_url {
        settings.client.base_url = base_url;
    }
    let user = cli
        .user
        .or(settings.user)
        .map(UserId::new)
        .transpose()
        .context("invalid user id")?;

    let live = LiveUpdates::create(settings.client, Arc::new(TracingUi::new()), Arc::new(user));
    let mut events = live.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                LinkEvent::AttemptFailed(kind) => tracing::info!("{} unavailable, falling back", kind),
                LinkEvent::ReconnectScheduled { attempt, delay } => {
                    tracing::info!("reconnect #{} in {:?}", attempt, delay)
                }
                other => tracing::debug!("{:?}", other),
            }
        }
    });
    live.subscribe(MessageKind::Other, |msg| {
        let raw = serde_json::to_string(msg)?;
        tracing::info!("unrecognised update: {}", raw);
        Ok(())
    });

    let transport = live.connect().await?;
    tracing::info!("watching updates over {}", transport);

    if let Some(action) = cli.action {
        let data: serde_json::Value =
            serde_json::from_str(&cli.data).context("--data must be JSON")?;
        live.send_user_action(action, data).await?;
    }

    tokio::signal::ctrl_c().await?;
    live.handle_page_event(PageEvent::Unload).await;
    Ok(())
}
