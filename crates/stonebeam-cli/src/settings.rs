//! Config file loading.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use stonebeam_client::ClientConfig;

/// Contents of `stonebeam.toml`.
///
/// ```toml
/// user = "u-1042"
///
/// [client]
/// base_url = "https://stonebeam.example"
/// poll_interval_ms = 5000
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub user: Option<String>,
    pub client: ClientConfig,
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
