//! Configuration types for tandem-federate.
//! Parsed from a TOML file; every field has a default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use tandem_protocol::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FederateConfig {
    #[serde(default)]
    pub channel: ChannelSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub model: ModelSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSection {
    /// Address both listeners bind on.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port for the federate-to-orchestrator channel. The orchestrator
    /// connects here first, so it must be agreed on out of band.
    #[serde(default = "default_notify_port")]
    pub notify_port: u16,
    /// Port for the orchestrator-to-federate command channel. 0 picks an
    /// ephemeral port, announced to the peer via the port exchange.
    #[serde(default)]
    pub command_port: u16,
    /// One poll window while waiting for a stalled message body, in ms.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Poll windows spent on a stalled body before giving up.
    #[serde(default = "default_body_retries")]
    pub body_retries: u32,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            notify_port: default_notify_port(),
            command_port: 0,
            poll_timeout_ms: default_poll_timeout_ms(),
            body_retries: default_body_retries(),
        }
    }
}

impl ChannelSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            retries: self.body_retries,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// When true (reference-compatible), a malformed radio-config or send
    /// payload is logged and acknowledged as a no-op. When false, it ends
    /// the session.
    #[serde(default = "default_true")]
    pub lenient_decode: bool,
    /// Memory bound on the set of already-reported next-event times.
    #[serde(default = "default_reported_cap")]
    pub reported_times_cap: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            lenient_decode: true,
            reported_times_cap: default_reported_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    /// Wifi reception range in meters.
    #[serde(default = "default_wifi_range")]
    pub wifi_range: f64,
    /// One-hop wifi link latency in nanoseconds.
    #[serde(default = "default_link_delay_ns")]
    pub link_delay_ns: i64,
    /// Cell round-trip-to-core latency in nanoseconds.
    #[serde(default = "default_cell_delay_ns")]
    pub cell_delay_ns: i64,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            wifi_range: default_wifi_range(),
            link_delay_ns: default_link_delay_ns(),
            cell_delay_ns: default_cell_delay_ns(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_notify_port() -> u16 {
    4747
}
fn default_poll_timeout_ms() -> u64 {
    1000
}
fn default_body_retries() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_reported_cap() -> usize {
    1000
}
fn default_wifi_range() -> f64 {
    500.0
}
fn default_link_delay_ns() -> i64 {
    1_000_000
}
fn default_cell_delay_ns() -> i64 {
    5_000_000
}

impl FederateConfig {
    /// Load config from file, or fall back to defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: FederateConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}
