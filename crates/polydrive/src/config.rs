use crate::error::Result;
use crate::namespace::Namespace;
use polylog::WriterId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of a drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Idle time before a remote content core is closed
    pub linger_ms: u64,
    /// How often the pool sweeps expired cores
    pub sweep_interval_ms: u64,
    /// Bytes per content block
    pub block_size: usize,
    /// Maximum symlink hops when following
    pub follow_limit: usize,
    /// Whether reads ask peers to wake up missing content by default
    pub wakeup: bool,
    /// Capacity of the event channel
    pub event_capacity: usize,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            linger_ms: 30_000,
            sweep_interval_ms: 5_000,
            block_size: polyblobs::BLOCK_SIZE,
            follow_limit: 16,
            wakeup: true,
            event_capacity: 256,
        }
    }
}

impl DriveConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

/// Everything needed to open a drive
#[derive(Debug, Clone, Default)]
pub struct DriveOptions {
    pub config: DriveConfig,
    pub namespace: Namespace,
    /// Identity of the local writer, random when unset
    pub local: Option<WriterId>,
}

impl DriveOptions {
    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_local(mut self, local: WriterId) -> Self {
        self.local = Some(local);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = DriveConfig::from_json(r#"{ "linger_ms": 10, "wakeup": false }"#).unwrap();
        assert_eq!(config.linger(), Duration::from_millis(10));
        assert!(!config.wakeup);
        assert_eq!(config.follow_limit, 16);
        assert_eq!(config.block_size, 64 * 1024);
        assert!(DriveConfig::from_json("{ \"linger_ms\": \"x\" }").is_err());
    }
}
