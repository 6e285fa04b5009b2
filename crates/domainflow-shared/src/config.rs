//! # Orchestrator Configuration
//!
//! Configuration for the orchestration core, loaded from a TOML file with
//! `DOMAINFLOW_`-prefixed environment overrides. Every field has a default,
//! so an empty file (or no file at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::{OrchestrationError, OrchestrationResult};

/// Control-channel behaviour: ack deadlines and the broadcast retry schedule
/// for `ControlChannelMissing` (the only transparently-retried error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Bounded wait for a worker acknowledgement
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Bounded FIFO capacity of each control bus
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Broadcast attempts before a missing channel fails the command
    #[serde(default = "default_broadcast_attempts")]
    pub broadcast_attempts: u32,
    /// Initial backoff between broadcast attempts
    #[serde(default = "default_broadcast_initial_backoff_ms")]
    pub broadcast_initial_backoff_ms: u64,
    /// Exponential backoff factor
    #[serde(default = "default_broadcast_backoff_factor")]
    pub broadcast_backoff_factor: f64,
}

fn default_ack_timeout_ms() -> u64 {
    2_000
}
fn default_channel_capacity() -> usize {
    8
}
fn default_broadcast_attempts() -> u32 {
    5
}
fn default_broadcast_initial_backoff_ms() -> u64 {
    50
}
fn default_broadcast_backoff_factor() -> f64 {
    2.0
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout_ms(),
            channel_capacity: default_channel_capacity(),
            broadcast_attempts: default_broadcast_attempts(),
            broadcast_initial_backoff_ms: default_broadcast_initial_backoff_ms(),
            broadcast_backoff_factor: default_broadcast_backoff_factor(),
        }
    }
}

impl ControlConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Backoff before retry `attempt` (zero-based): `initial * factor^attempt`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let millis = self.broadcast_initial_backoff_ms as f64
            * self.broadcast_backoff_factor.powi(attempt as i32);
        Duration::from_millis(millis as u64)
    }
}

/// Progress fan-in and transport fan-out buffer sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Per-execution bounded channel from phase service to aggregator
    #[serde(default = "default_progress_channel_capacity")]
    pub progress_channel_capacity: usize,
    /// Bounded buffer toward transport adapters, coalesced when full
    #[serde(default = "default_event_buffer_capacity")]
    pub event_buffer_capacity: usize,
}

fn default_progress_channel_capacity() -> usize {
    64
}
fn default_event_buffer_capacity() -> usize {
    256
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            progress_channel_capacity: default_progress_channel_capacity(),
            event_buffer_capacity: default_event_buffer_capacity(),
        }
    }
}

/// Database connection settings for the Postgres backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_database_url() -> String {
    "postgres://localhost/domainflow".to_string()
}
fn default_max_connections() -> u32 {
    10
}
fn default_acquire_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Root configuration for the orchestration core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainFlowConfig {
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl DomainFlowConfig {
    /// Load from a TOML file, then apply `DOMAINFLOW_`-prefixed environment
    /// overrides (e.g. `DOMAINFLOW_CONTROL__ACK_TIMEOUT_MS=500`).
    pub fn from_file(path: impl AsRef<Path>) -> OrchestrationResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("DOMAINFLOW").separator("__"))
            .build()
            .map_err(|e| OrchestrationError::ConfigurationInvalid {
                reason: e.to_string(),
            })?;
        settings
            .try_deserialize()
            .map_err(|e| OrchestrationError::ConfigurationInvalid {
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_spec_suggestions() {
        let config = DomainFlowConfig::default();
        assert_eq!(config.control.ack_timeout(), Duration::from_secs(2));
        assert_eq!(config.control.channel_capacity, 8);
        assert_eq!(config.control.broadcast_attempts, 5);
        assert_eq!(config.control.backoff_delay(0), Duration::from_millis(50));
        assert_eq!(config.control.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(config.control.backoff_delay(2), Duration::from_millis(200));
    }

    #[test]
    fn test_from_file_with_partial_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("domainflow.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[control]\nack_timeout_ms = 250\n\n[database]\nmax_connections = 3"
        )
        .unwrap();

        let config = DomainFlowConfig::from_file(&path).unwrap();
        assert_eq!(config.control.ack_timeout_ms, 250);
        // Unspecified fields keep their defaults
        assert_eq!(config.control.broadcast_attempts, 5);
        assert_eq!(config.database.max_connections, 3);
        assert_eq!(config.progress.event_buffer_capacity, 256);
    }

    #[test]
    fn test_from_file_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("domainflow.toml");
        std::fs::write(&path, "[control\nack_timeout_ms = ").unwrap();

        let err = DomainFlowConfig::from_file(&path).unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::ConfigurationInvalid { .. }
        ));
    }
}
