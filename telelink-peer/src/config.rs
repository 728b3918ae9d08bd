use serde::{Deserialize, Serialize};
use std::time::Duration;
use telelink_core::IceServerConfig;

pub const DEFAULT_STUN_ADDR: &str = "stun:stun.l.google.com:19302";

/// Tunables for one peer session. Timeouts are plain milliseconds so the
/// struct can be loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ice_servers: Vec<IceServerConfig>,
    /// How long a late arrival waits for a remote role claim before claiming
    /// impolite itself.
    pub role_arrival_timeout_ms: u64,
    /// How long a claim must stay uncontested before it is confirmed.
    pub role_confirm_timeout_ms: u64,
    /// Debounce applied before rebuilding a degraded connection.
    pub reset_grace_period_ms: u64,
    /// Data channel keepalive interval; zero disables it.
    pub heartbeat_interval_ms: u64,
    pub data_channel_label: String,
    /// Gather host candidates on loopback interfaces. Only useful when both
    /// peers run on the same machine.
    pub include_loopback_candidates: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig::stun(DEFAULT_STUN_ADDR)],
            role_arrival_timeout_ms: 1000,
            role_confirm_timeout_ms: 500,
            reset_grace_period_ms: 2500,
            heartbeat_interval_ms: 5000,
            data_channel_label: "consultation".to_owned(),
            include_loopback_candidates: false,
        }
    }
}

impl SessionConfig {
    pub fn role_arrival_timeout(&self) -> Duration {
        Duration::from_millis(self.role_arrival_timeout_ms)
    }

    pub fn role_confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.role_confirm_timeout_ms)
    }

    pub fn reset_grace_period(&self) -> Duration {
        Duration::from_millis(self.reset_grace_period_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    /// Configuration for two peers on one host with no external servers.
    pub fn local() -> Self {
        Self {
            ice_servers: Vec::new(),
            include_loopback_candidates: true,
            ..Self::default()
        }
    }
}
