//! Pipeline configuration.
//!
//! Configuration values should be provided by the deployment environment,
//! not hardcoded. [`IngestConfig::from_env`] reads `AUDIT_*` variables;
//! every struct also implements `Default` with local-development values
//! so tests and examples can construct configs directly.
//!
//! Invalid configuration is the only error class that aborts the process
//! (exit code 1).

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error. Raised only at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {name}: {detail}")]
    Invalid {
        /// The offending variable.
        name: String,
        /// What was wrong with it.
        detail: String,
    },
}

/// Where a brand-new consumer group starts reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AutoOffsetReset {
    /// Start from the beginning of each partition.
    Earliest,
    /// Start from the end (only new events).
    #[default]
    Latest,
}

impl AutoOffsetReset {
    /// The librdkafka configuration string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

impl FromStr for AutoOffsetReset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            other => Err(format!("expected \"earliest\" or \"latest\", got {other:?}")),
        }
    }
}

impl fmt::Display for AutoOffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event-bus connection and batch-shape options.
///
/// Auto-commit is deliberately absent: the consumer always runs with
/// `enable.auto.commit=false` and commits manually after each message is
/// accounted for.
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Comma-separated broker addresses.
    pub bootstrap_servers: String,
    /// Consumer group identity; drives rebalance.
    pub consumer_group_id: String,
    /// Behaviour on first subscription.
    pub auto_offset_reset: AutoOffsetReset,
    /// Liveness bound for a single batch, milliseconds.
    pub max_poll_interval_ms: u32,
    /// Maximum bytes fetched per request.
    pub fetch_max_bytes: u32,
    /// Maximum records per poll.
    pub max_poll_records: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            consumer_group_id: "order-audit-trail".to_string(),
            auto_offset_reset: AutoOffsetReset::Latest,
            max_poll_interval_ms: 300_000,
            fetch_max_bytes: 52_428_800,
            max_poll_records: 500,
        }
    }
}

/// Audit-store connection options. The pool bounds double as the
/// pipeline's backpressure signal: partition tasks block on acquisition.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Login role.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Postgres `sslmode` string (`disable`, `prefer`, `require`, …).
    pub ssl_mode: String,
    /// Minimum pooled connections.
    pub min_pool_size: u32,
    /// Maximum pooled connections.
    pub max_pool_size: u32,
    /// Per-statement timeout, seconds.
    pub command_timeout_seconds: u64,
    /// Pool acquisition timeout, seconds.
    pub connection_timeout_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "audit".to_string(),
            username: "audit".to_string(),
            password: "audit".to_string(),
            ssl_mode: "prefer".to_string(),
            min_pool_size: 5,
            max_pool_size: 100,
            command_timeout_seconds: 30,
            connection_timeout_seconds: 10,
        }
    }
}

/// Dispatcher, validator and metrics tuning.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Persist retries before a message is dead-lettered.
    pub max_retries: usize,
    /// First backoff delay, milliseconds.
    pub backoff_initial_ms: u64,
    /// Backoff cap, milliseconds.
    pub backoff_max_ms: u64,
    /// Validator skew window into the past, days.
    pub timestamp_skew_past_days: i64,
    /// Validator skew window into the future, seconds.
    pub timestamp_skew_future_seconds: i64,
    /// Metrics flush cadence, milliseconds.
    pub metrics_flush_interval_ms: u64,
    /// Bounded metrics queue capacity; overflow drops oldest samples.
    pub metrics_queue_capacity: usize,
    /// Store the partition cursor in the audit-store transaction (true)
    /// or rely on bus-held offsets plus `event_id` dedup (false).
    pub cursor_co_located: bool,
    /// Hard shutdown deadline, seconds.
    pub shutdown_grace_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_initial_ms: 100,
            backoff_max_ms: 30_000,
            timestamp_skew_past_days: 30,
            timestamp_skew_future_seconds: 300,
            metrics_flush_interval_ms: 5_000,
            metrics_queue_capacity: 4_096,
            cursor_co_located: true,
            shutdown_grace_seconds: 30,
        }
    }
}

/// Complete ingester configuration.
#[derive(Clone, Debug, Default)]
pub struct IngestConfig {
    /// Bus options.
    pub bus: BusConfig,
    /// Store options.
    pub store: StoreConfig,
    /// Pipeline tuning.
    pub pipeline: PipelineConfig,
}

impl IngestConfig {
    /// Load configuration from `AUDIT_*` environment variables, falling
    /// back to the documented defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is set but unparseable, or
    /// when the combination is inconsistent (pool bounds inverted,
    /// backoff cap below the initial delay, zero queue capacity).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            bus: BusConfig {
                bootstrap_servers: string_var(
                    "AUDIT_BUS_BOOTSTRAP_SERVERS",
                    defaults.bus.bootstrap_servers,
                ),
                consumer_group_id: string_var(
                    "AUDIT_BUS_CONSUMER_GROUP_ID",
                    defaults.bus.consumer_group_id,
                ),
                auto_offset_reset: parsed_var(
                    "AUDIT_BUS_AUTO_OFFSET_RESET",
                    defaults.bus.auto_offset_reset,
                )?,
                max_poll_interval_ms: parsed_var(
                    "AUDIT_BUS_MAX_POLL_INTERVAL_MS",
                    defaults.bus.max_poll_interval_ms,
                )?,
                fetch_max_bytes: parsed_var(
                    "AUDIT_BUS_FETCH_MAX_BYTES",
                    defaults.bus.fetch_max_bytes,
                )?,
                max_poll_records: parsed_var(
                    "AUDIT_BUS_MAX_POLL_RECORDS",
                    defaults.bus.max_poll_records,
                )?,
            },
            store: StoreConfig {
                host: string_var("AUDIT_STORE_HOST", defaults.store.host),
                port: parsed_var("AUDIT_STORE_PORT", defaults.store.port)?,
                database: string_var("AUDIT_STORE_DATABASE", defaults.store.database),
                username: string_var("AUDIT_STORE_USERNAME", defaults.store.username),
                password: string_var("AUDIT_STORE_PASSWORD", defaults.store.password),
                ssl_mode: string_var("AUDIT_STORE_SSL_MODE", defaults.store.ssl_mode),
                min_pool_size: parsed_var("AUDIT_STORE_MIN_POOL_SIZE", defaults.store.min_pool_size)?,
                max_pool_size: parsed_var("AUDIT_STORE_MAX_POOL_SIZE", defaults.store.max_pool_size)?,
                command_timeout_seconds: parsed_var(
                    "AUDIT_STORE_COMMAND_TIMEOUT_SECONDS",
                    defaults.store.command_timeout_seconds,
                )?,
                connection_timeout_seconds: parsed_var(
                    "AUDIT_STORE_CONNECTION_TIMEOUT_SECONDS",
                    defaults.store.connection_timeout_seconds,
                )?,
            },
            pipeline: PipelineConfig {
                max_retries: parsed_var("AUDIT_PIPELINE_MAX_RETRIES", defaults.pipeline.max_retries)?,
                backoff_initial_ms: parsed_var(
                    "AUDIT_PIPELINE_BACKOFF_INITIAL_MS",
                    defaults.pipeline.backoff_initial_ms,
                )?,
                backoff_max_ms: parsed_var(
                    "AUDIT_PIPELINE_BACKOFF_MAX_MS",
                    defaults.pipeline.backoff_max_ms,
                )?,
                timestamp_skew_past_days: parsed_var(
                    "AUDIT_PIPELINE_TIMESTAMP_SKEW_PAST_DAYS",
                    defaults.pipeline.timestamp_skew_past_days,
                )?,
                timestamp_skew_future_seconds: parsed_var(
                    "AUDIT_PIPELINE_TIMESTAMP_SKEW_FUTURE_SECONDS",
                    defaults.pipeline.timestamp_skew_future_seconds,
                )?,
                metrics_flush_interval_ms: parsed_var(
                    "AUDIT_PIPELINE_METRICS_FLUSH_INTERVAL_MS",
                    defaults.pipeline.metrics_flush_interval_ms,
                )?,
                metrics_queue_capacity: parsed_var(
                    "AUDIT_PIPELINE_METRICS_QUEUE_CAPACITY",
                    defaults.pipeline.metrics_queue_capacity,
                )?,
                cursor_co_located: parsed_var(
                    "AUDIT_PIPELINE_CURSOR_CO_LOCATED",
                    defaults.pipeline.cursor_co_located,
                )?,
                shutdown_grace_seconds: parsed_var(
                    "AUDIT_PIPELINE_SHUTDOWN_GRACE_SECONDS",
                    defaults.pipeline.shutdown_grace_seconds,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.min_pool_size > self.store.max_pool_size {
            return Err(ConfigError::Invalid {
                name: "AUDIT_STORE_MIN_POOL_SIZE".to_string(),
                detail: format!(
                    "min pool size {} exceeds max pool size {}",
                    self.store.min_pool_size, self.store.max_pool_size
                ),
            });
        }
        if self.pipeline.backoff_initial_ms > self.pipeline.backoff_max_ms {
            return Err(ConfigError::Invalid {
                name: "AUDIT_PIPELINE_BACKOFF_INITIAL_MS".to_string(),
                detail: format!(
                    "initial backoff {}ms exceeds cap {}ms",
                    self.pipeline.backoff_initial_ms, self.pipeline.backoff_max_ms
                ),
            });
        }
        if self.pipeline.metrics_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                name: "AUDIT_PIPELINE_METRICS_QUEUE_CAPACITY".to_string(),
                detail: "capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn string_var(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn parsed_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name: name.to_string(),
            detail: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        IngestConfig::default().validate().unwrap();
    }

    #[test]
    fn default_values_match_contract() {
        let config = IngestConfig::default();
        assert_eq!(config.pipeline.max_retries, 5);
        assert_eq!(config.pipeline.backoff_initial_ms, 100);
        assert_eq!(config.pipeline.backoff_max_ms, 30_000);
        assert_eq!(config.pipeline.timestamp_skew_past_days, 30);
        assert_eq!(config.pipeline.timestamp_skew_future_seconds, 300);
        assert_eq!(config.store.min_pool_size, 5);
        assert_eq!(config.store.max_pool_size, 100);
        assert!(config.pipeline.cursor_co_located);
    }

    #[test]
    fn inverted_pool_bounds_are_rejected() {
        let mut config = IngestConfig::default();
        config.store.min_pool_size = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let mut config = IngestConfig::default();
        config.pipeline.backoff_initial_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn offset_reset_parses() {
        assert_eq!(
            "earliest".parse::<AutoOffsetReset>().unwrap(),
            AutoOffsetReset::Earliest
        );
        assert!("sometimes".parse::<AutoOffsetReset>().is_err());
    }
}
