//! Orchestrator configuration
//!
//! Loaded from an optional YAML file; every field has a default so an empty
//! document is a valid configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub job_service: JobServiceConfig,
    pub transport: TransportConfig,
    pub limits: LimitsConfig,
    pub retry: RetryConfig,
    pub reinit: ReinitConfig,
    pub notifications: NotificationConfig,
}

/// Job queue settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobServiceConfig {
    pub queue_depth: usize,
    /// Default timeout for callers waiting on a job result
    pub wait_timeout_ms: u64,
}

impl Default for JobServiceConfig {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            wait_timeout_ms: 300_000,
        }
    }
}

/// Graph request transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub request_timeout_ms: u64,
    pub channel_depth: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            channel_depth: 256,
        }
    }
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Array-wide limits enforced by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_luns_per_raid_group: u32,
    /// Upper bound on objects one RAID group destroy may remove
    pub max_objects_per_destroy: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_luns_per_raid_group: 256,
            max_objects_per_destroy: 25,
        }
    }
}

/// Bounded retry for transient refusals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Timers for the post-commit half of drive reinitialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReinitConfig {
    pub edge_wait_timeout_ms: u64,
    pub edge_poll_interval_ms: u64,
    pub key_wait_timeout_ms: u64,
    pub key_poll_interval_ms: u64,
}

impl Default for ReinitConfig {
    fn default() -> Self {
        Self {
            edge_wait_timeout_ms: 60_000,
            edge_poll_interval_ms: 1000,
            key_wait_timeout_ms: 30_000,
            key_poll_interval_ms: 100,
        }
    }
}

impl ReinitConfig {
    pub fn edge_wait(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.edge_wait_timeout_ms),
            Duration::from_millis(self.edge_poll_interval_ms),
        )
    }

    pub fn key_wait(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.key_wait_timeout_ms),
            Duration::from_millis(self.key_poll_interval_ms),
        )
    }
}

/// Notification fan-out settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub broadcast_capacity: usize,
    /// Also log every notification as JSON
    pub log_events: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 1024,
            log_events: true,
        }
    }
}

/// Lifecycle polling interval used by commit-phase waits
pub const LIFECYCLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl OrchestratorConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(source: &str) -> Result<Self> {
        let config: OrchestratorConfig = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file on disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_service.queue_depth == 0 {
            return Err(Error::Configuration("job_service.queue_depth must be > 0".into()));
        }
        if self.transport.channel_depth == 0 || self.transport.request_timeout_ms == 0 {
            return Err(Error::Configuration(
                "transport channel depth and request timeout must be > 0".into(),
            ));
        }
        if self.limits.max_objects_per_destroy < 2 {
            return Err(Error::Configuration(
                "limits.max_objects_per_destroy must allow at least the RAID group and one drive"
                    .into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Configuration("retry.max_attempts must be > 0".into()));
        }
        if self.reinit.edge_poll_interval_ms == 0 || self.reinit.key_poll_interval_ms == 0 {
            return Err(Error::Configuration("reinit poll intervals must be > 0".into()));
        }
        if self.notifications.broadcast_capacity == 0 {
            return Err(Error::Configuration(
                "notifications.broadcast_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.limits.max_objects_per_destroy, 25);
        assert_eq!(config.retry.max_attempts, 30);
        assert_eq!(config.retry.delay(), Duration::from_secs(1));
        assert_eq!(config.reinit.edge_wait().0, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = OrchestratorConfig::from_yaml("retry:\n  delay_ms: 5\n").unwrap();
        assert_eq!(config.retry.delay_ms, 5);
        assert_eq!(config.retry.max_attempts, 30);
        assert_eq!(config.transport, TransportConfig::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = OrchestratorConfig::from_yaml("retry:\n  max_attempts: 0\n");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "limits:\n  max_luns_per_raid_group: 8").unwrap();
        let config = OrchestratorConfig::load(file.path()).unwrap();
        assert_eq!(config.limits.max_luns_per_raid_group, 8);
    }
}
