//! Orchestrator tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use glasslink_protocol::constants::{
    DEFAULT_API_PORT, DEFAULT_CONTROL_OP_TIMEOUT, DEFAULT_DISCOVERY_TIMEOUT,
    DEFAULT_PAIRING_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT,
};

/// Timeouts and limits applied by the orchestrator.
///
/// Durations are stored in milliseconds so the struct can be embedded in
/// a TOML file as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Control link operation timeout.
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: u64,

    /// Data link request timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Scan window used by reconnect.
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,

    /// Invalid codes tolerated per pairing session.
    #[serde(default = "default_pairing_attempts")]
    pub pairing_attempts: u32,

    #[serde(default = "default_data_port")]
    pub data_port: u16,

    /// Data link health probe interval (0 = disabled).
    #[serde(default)]
    pub health_interval_ms: u64,
}

fn default_control_timeout_ms() -> u64 {
    DEFAULT_CONTROL_OP_TIMEOUT.as_millis() as u64
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_millis() as u64
}

fn default_discovery_timeout_ms() -> u64 {
    DEFAULT_DISCOVERY_TIMEOUT.as_millis() as u64
}

fn default_pairing_attempts() -> u32 {
    DEFAULT_PAIRING_ATTEMPTS
}

fn default_data_port() -> u16 {
    DEFAULT_API_PORT
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            control_timeout_ms: default_control_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            pairing_attempts: default_pairing_attempts(),
            data_port: default_data_port(),
            health_interval_ms: 0,
        }
    }
}

impl OrchestratorConfig {
    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn health_interval(&self) -> Option<Duration> {
        (self.health_interval_ms > 0).then(|| Duration::from_millis(self.health_interval_ms))
    }
}
