//! Dispatcher configuration

use device_command_shared::defaults;
use std::time::Duration;
use tracing::warn;

/// Configuration for the command service and its transport
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Source name stamped on outbound headers
    pub source: String,
    /// Wait used when a caller's timeout is empty or unparsable
    pub default_timeout: Duration,
    /// Number of response-consuming workers
    pub response_workers: usize,
    /// Device connector address for the TCP transport
    pub connector_addr: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            source: "device-command".into(),
            default_timeout: Duration::from_millis(defaults::COMMAND_TIMEOUT_MS),
            response_workers: defaults::RESPONSE_WORKERS,
            connector_addr: defaults::CONNECTOR_ADDR.into(),
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

impl DispatchConfig {
    /// Defaults overridden by `DEVICE_COMMAND_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(source) = lookup("DEVICE_COMMAND_SOURCE") {
            config.source = source;
        }
        if let Some(addr) = lookup("DEVICE_COMMAND_CONNECTOR_ADDR") {
            config.connector_addr = addr;
        }
        if let Some(raw) = lookup("DEVICE_COMMAND_RESPONSE_WORKERS") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => config.response_workers = n,
                _ => warn!("ignoring invalid DEVICE_COMMAND_RESPONSE_WORKERS={}", raw),
            }
        }
        duration_override(&lookup, "DEVICE_COMMAND_DEFAULT_TIMEOUT", &mut config.default_timeout);
        duration_override(&lookup, "DEVICE_COMMAND_CONNECT_TIMEOUT", &mut config.connect_timeout);
        duration_override(&lookup, "DEVICE_COMMAND_RECONNECT_DELAY", &mut config.reconnect_delay);
        duration_override(
            &lookup,
            "DEVICE_COMMAND_MAX_RECONNECT_DELAY",
            &mut config.max_reconnect_delay,
        );

        config
    }

    /// Resolve a caller-supplied timeout string such as `"5s"` or `"250ms"`
    pub fn parse_timeout(&self, raw: Option<&str>) -> Duration {
        match raw.map(str::trim) {
            None | Some("") => self.default_timeout,
            Some(raw) => humantime::parse_duration(raw).unwrap_or_else(|e| {
                warn!("invalid timeout {:?} ({}), using default", raw, e);
                self.default_timeout
            }),
        }
    }
}

fn duration_override(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut Duration) {
    if let Some(raw) = lookup(key) {
        match humantime::parse_duration(&raw) {
            Ok(d) => *target = d,
            Err(e) => warn!("ignoring invalid {}={} ({})", key, raw, e),
        }
    }
}
