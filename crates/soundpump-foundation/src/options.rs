use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::AudioError;

/// How the endpoint's shared buffer is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    Shared,
    Exclusive,
}

/// Tunables for a streaming session.
///
/// `manual_sync_latency_ms` only shapes the endpoint buffer when the session
/// falls back to polled synchronization; event-driven sessions let the
/// endpoint pick its own buffer size.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    pub share_mode: ShareMode,
    pub use_event_sync: bool,
    pub manual_sync_latency_ms: u64,
    pub prefer_device_native_format: bool,
    pub start_timeout_ms: u64,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            share_mode: ShareMode::Shared,
            use_event_sync: true,
            manual_sync_latency_ms: 100,
            prefer_device_native_format: false,
            start_timeout_ms: 1_000,
        }
    }
}

impl StreamOptions {
    pub fn manual_sync_latency(&self) -> Duration {
        Duration::from_millis(self.manual_sync_latency_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    /// Loads options from an optional TOML file with `SOUNDPUMP_*`
    /// environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self, AudioError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(config::Environment::with_prefix("SOUNDPUMP"))
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| AudioError::Config(e.to_string()))
    }
}
