//! Engine configuration
//!
//! Loaded from a JSON file. Every key is optional and falls back to its
//! default; the loaded values are validated before use.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::Severity;

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Ten years
const MAX_LEDGER_RETENTION_SECS: u64 = 10 * 365 * 24 * 3_600;

/// Process-wide tunables of one engine instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Max operations grouped into one batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rounds per advance call, and the fairness-gate skew bound
    #[serde(default = "default_stride")]
    pub stride: u64,

    /// Worker threads for propagation and dispatched advance tasks
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Dispatch variant only: queued tasks allowed per worker
    #[serde(default = "default_queue_tolerance")]
    pub queue_tolerance: usize,

    /// Max batches registered at once
    #[serde(default = "default_registry_capacity")]
    pub registry_capacity: usize,

    /// Consecutive aborted rounds tolerated before a batch is failed
    #[serde(default = "default_max_round_retries")]
    pub max_round_retries: u32,

    /// Delay before an aborted round is retried; doubles per consecutive abort
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How long finished operations stay in the completion ledger
    #[serde(default = "default_ledger_retention_secs")]
    pub ledger_retention_secs: u64,

    /// Max outcomes kept for callers to take; the oldest are dropped first
    #[serde(default = "default_outcome_capacity")]
    pub outcome_capacity: usize,

    /// Lowest log severity written
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_batch_size() -> usize {
    10
}
fn default_stride() -> u64 {
    42_000
}
fn default_num_workers() -> usize {
    4
}
fn default_queue_tolerance() -> usize {
    3
}
fn default_registry_capacity() -> usize {
    16_384
}
fn default_max_round_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    10
}
fn default_ledger_retention_secs() -> u64 {
    3_600
}
fn default_outcome_capacity() -> usize {
    65_536
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            stride: default_stride(),
            num_workers: default_num_workers(),
            queue_tolerance: default_queue_tolerance(),
            registry_capacity: default_registry_capacity(),
            max_round_retries: default_max_round_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            ledger_retention_secs: default_ledger_retention_secs(),
            outcome_capacity: default_outcome_capacity(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from JSON text
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be >= 1".into()));
        }
        if self.stride == 0 {
            return Err(ConfigError::Invalid("stride must be >= 1".into()));
        }
        if self.num_workers == 0 {
            return Err(ConfigError::Invalid("num_workers must be >= 1".into()));
        }
        if self.queue_tolerance == 0 {
            return Err(ConfigError::Invalid("queue_tolerance must be >= 1".into()));
        }
        if self.registry_capacity == 0 {
            return Err(ConfigError::Invalid(
                "registry_capacity must be >= 1".into(),
            ));
        }
        if !(1..=MAX_LEDGER_RETENTION_SECS).contains(&self.ledger_retention_secs) {
            return Err(ConfigError::Invalid(format!(
                "ledger_retention_secs must be in 1..={}",
                MAX_LEDGER_RETENTION_SECS
            )));
        }
        if self.outcome_capacity == 0 {
            return Err(ConfigError::Invalid("outcome_capacity must be >= 1".into()));
        }
        self.log_severity()?;
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn ledger_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ledger_retention_secs.min(MAX_LEDGER_RETENTION_SECS) as i64)
    }

    pub fn log_severity(&self) -> Result<Severity, ConfigError> {
        self.log_level.parse().map_err(ConfigError::Invalid)
    }

    /// Max tasks waiting in the pool before the dispatcher holds back
    pub fn dispatch_limit(&self) -> usize {
        self.num_workers.saturating_mul(self.queue_tolerance)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_stride(mut self, stride: u64) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_queue_tolerance(mut self, queue_tolerance: usize) -> Self {
        self.queue_tolerance = queue_tolerance;
        self
    }

    pub fn with_registry_capacity(mut self, registry_capacity: usize) -> Self {
        self.registry_capacity = registry_capacity;
        self
    }

    pub fn with_max_round_retries(mut self, retries: u32) -> Self {
        self.max_round_retries = retries;
        self
    }

    pub fn with_retry_backoff_ms(mut self, retry_backoff_ms: u64) -> Self {
        self.retry_backoff_ms = retry_backoff_ms;
        self
    }

    pub fn with_ledger_retention_secs(mut self, secs: u64) -> Self {
        self.ledger_retention_secs = secs;
        self
    }

    pub fn with_outcome_capacity(mut self, outcome_capacity: usize) -> Self {
        self.outcome_capacity = outcome_capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.stride, 42_000);
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.queue_tolerance, 3);
        assert_eq!(config.registry_capacity, 16_384);
        assert_eq!(config.dispatch_limit(), 12);
        assert_eq!(config.retry_backoff(), Duration::from_millis(10));
        assert_eq!(config.ledger_retention(), chrono::Duration::hours(1));
        assert_eq!(config.outcome_capacity, 65_536);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"batch_size": 3, "stride": 8}"#).unwrap();
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.stride, 8);
        assert_eq!(config.num_workers, 4);
    }

    #[test]
    fn test_zero_values_rejected() {
        for json in [
            r#"{"batch_size": 0}"#,
            r#"{"stride": 0}"#,
            r#"{"num_workers": 0}"#,
            r#"{"queue_tolerance": 0}"#,
            r#"{"registry_capacity": 0}"#,
            r#"{"ledger_retention_secs": 0}"#,
            r#"{"ledger_retention_secs": 18446744073709551615}"#,
            r#"{"outcome_capacity": 0}"#,
        ] {
            assert!(
                matches!(EngineConfig::from_json(json), Err(ConfigError::Invalid(_))),
                "{}",
                json
            );
        }
    }

    #[test]
    fn test_zero_retry_backoff_allowed() {
        let config = EngineConfig::from_json(r#"{"retry_backoff_ms": 0}"#).unwrap();
        assert_eq!(config.retry_backoff(), Duration::ZERO);
    }

    #[test]
    fn test_negative_value_is_parse_error() {
        assert!(matches!(
            EngineConfig::from_json(r#"{"stride": -1}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_bad_log_level_rejected() {
        assert!(EngineConfig::from_json(r#"{"log_level": "loud"}"#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"num_workers": 2, "log_level": "warn"}}"#).unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.log_severity().unwrap(), Severity::Warn);
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::load(Path::new("/nonexistent/aerograph.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
