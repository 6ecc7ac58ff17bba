//! Configuration for the material resolver.
//!
//! # Example
//!
//! ```
//! use material_resolver::ResolverConfig;
//!
//! // Minimal config (uses defaults)
//! let config = ResolverConfig::default();
//! assert_eq!(config.global_limit, 8);
//! assert_eq!(config.cache_ttl_secs, 900);
//!
//! // Tuned config
//! let config = ResolverConfig {
//!     per_endpoint_limit: 2,
//!     min_record_count: 20,
//!     snapshot_path: Some("/var/lib/materials/cache.db".into()),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! Every field can be overridden from the environment with the
//! `MATERIAL_RESOLVER_` prefix, e.g. `MATERIAL_RESOLVER_GLOBAL_LIMIT=4`.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::resilience::{CircuitConfig, RetryConfig};
use crate::scheduler::SchedulerConfig;

/// Environment variable prefix for [`ResolverConfig::from_env`].
pub const ENV_PREFIX: &str = "MATERIAL_RESOLVER";

/// Configuration for the material resolver.
///
/// All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResolverConfig {
    /// Maximum backing-store operations in flight (default: 8)
    #[serde(default = "default_global_limit")]
    pub global_limit: usize,

    /// Maximum operations in flight per endpoint (default: 3)
    #[serde(default = "default_per_endpoint_limit")]
    pub per_endpoint_limit: usize,

    /// Hard cap on queued requests; unset = unbounded
    #[serde(default)]
    pub max_queued: Option<usize>,

    /// Cache freshness window (default: 15 minutes)
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Retry settings
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_growth")]
    pub retry_growth: f64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Minimum backoff after an overload response
    #[serde(default = "default_retry_exhausted_floor_ms")]
    pub retry_exhausted_floor_ms: u64,

    /// Fewer network records than this triggers fallback augmentation
    #[serde(default = "default_min_record_count")]
    pub min_record_count: usize,

    /// Budget for one full network resolution
    #[serde(default = "default_resolution_deadline_ms")]
    pub resolution_deadline_ms: u64,

    /// Budget for a single backing-store query, queueing included
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Network quiet period after a total failure
    #[serde(default = "default_failure_cooldown_secs")]
    pub failure_cooldown_secs: u64,

    /// At most one user-facing notification per error category per window
    #[serde(default = "default_notification_cooldown_secs")]
    pub notification_cooldown_secs: u64,

    /// Circuit breaker: failure rate that opens an endpoint's circuit
    #[serde(default = "default_circuit_failure_rate")]
    pub circuit_failure_rate: f32,
    #[serde(default = "default_circuit_open_secs")]
    pub circuit_open_secs: u64,

    /// SQLite file for snapshot persistence; unset = in-memory only
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

fn default_global_limit() -> usize { 8 }
fn default_per_endpoint_limit() -> usize { 3 }
fn default_cache_ttl_secs() -> u64 { 900 } // 15 min
fn default_retry_max_attempts() -> u32 { 3 }
fn default_retry_base_ms() -> u64 { 200 }
fn default_retry_growth() -> f64 { 2.0 }
fn default_retry_max_delay_ms() -> u64 { 5_000 }
fn default_retry_exhausted_floor_ms() -> u64 { 2_000 }
fn default_min_record_count() -> usize { 50 }
fn default_resolution_deadline_ms() -> u64 { 30_000 }
fn default_operation_timeout_ms() -> u64 { 10_000 }
fn default_failure_cooldown_secs() -> u64 { 30 }
fn default_notification_cooldown_secs() -> u64 { 30 }
fn default_circuit_failure_rate() -> f32 { 0.5 }
fn default_circuit_open_secs() -> u64 { 30 }

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            global_limit: default_global_limit(),
            per_endpoint_limit: default_per_endpoint_limit(),
            max_queued: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            retry_growth: default_retry_growth(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_exhausted_floor_ms: default_retry_exhausted_floor_ms(),
            min_record_count: default_min_record_count(),
            resolution_deadline_ms: default_resolution_deadline_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            failure_cooldown_secs: default_failure_cooldown_secs(),
            notification_cooldown_secs: default_notification_cooldown_secs(),
            circuit_failure_rate: default_circuit_failure_rate(),
            circuit_open_secs: default_circuit_open_secs(),
            snapshot_path: None,
        }
    }
}

impl ResolverConfig {
    /// Defaults overridden by `MATERIAL_RESOLVER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// An optional config file (any format the `config` crate detects by
    /// extension), then the environment on top.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the resolver cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.global_limit == 0 {
            return invalid("global_limit must be at least 1");
        }
        if self.per_endpoint_limit == 0 {
            return invalid("per_endpoint_limit must be at least 1");
        }
        if self.max_queued == Some(0) {
            return invalid("max_queued must be at least 1 when set");
        }
        if self.retry_max_attempts == 0 {
            return invalid("retry_max_attempts must be at least 1");
        }
        if !self.retry_growth.is_finite() || self.retry_growth < 1.0 {
            return invalid("retry_growth must be a finite number >= 1.0");
        }
        if self.retry_base_ms > self.retry_max_delay_ms {
            return invalid("retry_base_ms must not exceed retry_max_delay_ms");
        }
        if self.resolution_deadline_ms == 0 || self.operation_timeout_ms == 0 {
            return invalid("timeouts must be non-zero");
        }
        if !(self.circuit_failure_rate > 0.0 && self.circuit_failure_rate <= 1.0) {
            return invalid("circuit_failure_rate must be in (0, 1]");
        }
        Ok(())
    }

    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            global_limit: self.global_limit,
            per_endpoint_limit: self.per_endpoint_limit,
            max_queued: self.max_queued,
        }
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_ms),
            growth: self.retry_growth,
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: 0.15,
            exhausted_floor: Duration::from_millis(self.retry_exhausted_floor_ms),
        }
    }

    #[must_use]
    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_rate: self.circuit_failure_rate,
            open_wait: Duration::from_secs(self.circuit_open_secs),
            ..CircuitConfig::default()
        }
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    #[must_use]
    pub fn resolution_deadline(&self) -> Duration {
        Duration::from_millis(self.resolution_deadline_ms)
    }

    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    #[must_use]
    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.failure_cooldown_secs)
    }

    #[must_use]
    pub fn notification_cooldown(&self) -> Duration {
        Duration::from_secs(self.notification_cooldown_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ResolverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.per_endpoint_limit, 3);
        assert_eq!(config.min_record_count, 50);
        assert_eq!(config.cache_ttl(), Duration::from_secs(900));
        assert_eq!(config.failure_cooldown(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ResolverConfig =
            serde_json::from_str(r#"{"global_limit": 4, "snapshot_path": "cache.db"}"#).unwrap();
        assert_eq!(config.global_limit, 4);
        assert_eq!(config.per_endpoint_limit, 3);
        assert_eq!(config.snapshot_path.as_deref(), Some("cache.db"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            ResolverConfig { global_limit: 0, ..Default::default() },
            ResolverConfig { per_endpoint_limit: 0, ..Default::default() },
            ResolverConfig { retry_max_attempts: 0, ..Default::default() },
            ResolverConfig { retry_growth: 0.5, ..Default::default() },
            ResolverConfig { retry_growth: f64::NAN, ..Default::default() },
            ResolverConfig { max_queued: Some(0), ..Default::default() },
            ResolverConfig { retry_base_ms: 10_000, ..Default::default() },
            ResolverConfig { operation_timeout_ms: 0, ..Default::default() },
            ResolverConfig { circuit_failure_rate: 0.0, ..Default::default() },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "accepted {config:?}"
            );
        }
    }

    #[test]
    fn test_conversions() {
        let config = ResolverConfig {
            global_limit: 5,
            max_queued: Some(100),
            retry_base_ms: 50,
            retry_max_delay_ms: 800,
            ..Default::default()
        };

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.global_limit, 5);
        assert_eq!(scheduler.max_queued, Some(100));

        let retry = config.retry_config();
        assert_eq!(retry.base_delay, Duration::from_millis(50));
        assert_eq!(retry.max_delay, Duration::from_millis(800));
        assert_eq!(retry.jitter, 0.15);

        assert_eq!(config.circuit_config().open_wait, Duration::from_secs(30));
    }

    /// Serializes tests that touch process environment variables.
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

    fn temp_config_file(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("material_resolver_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_from_env_without_overrides_matches_defaults() {
        let _env = ENV_LOCK.lock();
        let loaded = ResolverConfig::from_env().unwrap();
        assert_eq!(loaded.global_limit, ResolverConfig::default().global_limit);
    }

    #[test]
    fn test_load_file_then_env_overrides() {
        let _env = ENV_LOCK.lock();
        let path = temp_config_file(
            "global_limit = 6\nper_endpoint_limit = 2\nmin_record_count = 20\nsnapshot_path = \"/tmp/materials.db\"\n",
        );
        std::env::set_var("MATERIAL_RESOLVER_GLOBAL_LIMIT", "4");
        std::env::set_var("MATERIAL_RESOLVER_RETRY_GROWTH", "1.5");

        let loaded = ResolverConfig::load(Some(path.as_path()));

        std::env::remove_var("MATERIAL_RESOLVER_GLOBAL_LIMIT");
        std::env::remove_var("MATERIAL_RESOLVER_RETRY_GROWTH");
        let _ = std::fs::remove_file(&path);

        let config = loaded.unwrap();
        // Environment beats file, file beats defaults
        assert_eq!(config.global_limit, 4);
        assert_eq!(config.retry_growth, 1.5);
        assert_eq!(config.per_endpoint_limit, 2);
        assert_eq!(config.min_record_count, 20);
        assert_eq!(config.snapshot_path.as_deref(), Some("/tmp/materials.db"));
        assert_eq!(config.cache_ttl_secs, 900);
    }

    #[test]
    fn test_load_validates_env_overrides() {
        let _env = ENV_LOCK.lock();
        std::env::set_var("MATERIAL_RESOLVER_PER_ENDPOINT_LIMIT", "0");
        let loaded = ResolverConfig::load(None);
        std::env::remove_var("MATERIAL_RESOLVER_PER_ENDPOINT_LIMIT");

        assert!(matches!(loaded, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let _env = ENV_LOCK.lock();
        let path = std::env::temp_dir().join(format!("material_resolver_missing_{}.toml", uuid::Uuid::new_v4()));
        let config = ResolverConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config, ResolverConfig::default());
    }
}
