//! Configuration types for AnvilQ.
//!
//! This module contains all configuration structures used throughout AnvilQ,
//! including the backend list, producer failure policy, retry policy and
//! per-backend settings.

use crate::error::{AnvilError, AnvilResult};
use crate::queue::BackendType;
use serde::{Deserialize, Serialize};

/// Main configuration for AnvilQ.
///
/// # Examples
///
/// ```rust
/// use anvilq::config::{AnvilConfig, ProducerFailurePolicy, parse_job_queues};
///
/// let config = AnvilConfig {
///     job_queues: parse_job_queues("memory").unwrap(),
///     server_mode: "async-worker".to_string(),
///     producer_failure_policy: ProducerFailurePolicy::Strict,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnvilConfig {
    /// Ordered backend list; earlier entries take priority on enqueue
    pub job_queues: Vec<BackendType>,

    /// Server mode label, used only as a metric tag
    pub server_mode: String,

    /// What to do when a backend's producer fails to connect
    pub producer_failure_policy: ProducerFailurePolicy,

    /// Retry policy applied to each enqueue
    pub retry: RetryPolicy,

    /// In-memory backend configuration
    pub memory: MemoryBackendConfig,

    /// Redis backend configuration
    #[cfg(feature = "redis-queue")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
    pub redis: RedisConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for AnvilConfig {
    fn default() -> Self {
        Self {
            job_queues: vec![BackendType::Memory],
            server_mode: "default".to_string(),
            producer_failure_policy: ProducerFailurePolicy::Lenient,
            retry: RetryPolicy::default(),
            memory: MemoryBackendConfig::default(),
            #[cfg(feature = "redis-queue")]
            redis: RedisConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Policy applied when a producer connection fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerFailurePolicy {
    /// Any failed backend fails `connect_producer` as a whole
    Strict,
    /// Failed backends are logged and pruned; the rest stay active
    Lenient,
}

impl ProducerFailurePolicy {
    /// Map the "crash if cannot connect" flag onto a policy.
    pub fn from_crash_flag(crash: bool) -> Self {
        if crash { Self::Strict } else { Self::Lenient }
    }
}

/// Parse a comma-separated backend list.
///
/// Entries are trimmed and empty entries dropped. Unknown backend names are a
/// configuration error.
pub fn parse_job_queues(raw: &str) -> AnvilResult<Vec<BackendType>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse)
        .collect()
}

/// In-memory backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBackendConfig {
    /// Maximum number of held jobs (0 = unlimited)
    pub max_queue_size: usize,

    /// How often the consumer loop polls for due jobs (in milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 0,
            poll_interval_ms: 100,
        }
    }
}

/// Redis backend configuration.
#[cfg(feature = "redis-queue")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    pub connection_string: String,

    /// Key prefix for Redis keys
    pub key_prefix: String,

    /// How often the consumer loop polls Redis when idle (in milliseconds)
    pub poll_interval_ms: u64,

    /// Timeout for establishing the connection (in seconds)
    pub connect_timeout_secs: u64,
}

#[cfg(feature = "redis-queue")]
impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            connection_string: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "anvilq".to_string(),
            poll_interval_ms: 500,
            connect_timeout_secs: 10,
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Base delay between retries (in milliseconds)
    pub base_delay_ms: u64,

    /// Maximum delay between retries (in milliseconds)
    pub max_delay_ms: u64,

    /// Backoff strategy
    pub backoff_strategy: BackoffStrategy,

    /// Whether to enable jitter in delay calculations
    pub enable_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000, // 1 second
            max_delay_ms: 60000, // 1 minute
            backoff_strategy: BackoffStrategy::Exponential { multiplier: 2.0 },
            enable_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a retry policy with exponential backoff.
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_strategy: BackoffStrategy::Exponential { multiplier: 2.0 },
            ..Default::default()
        }
    }

    /// Create a retry policy with linear backoff.
    pub fn linear(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_strategy: BackoffStrategy::Linear { increment_ms: 1000 },
            ..Default::default()
        }
    }

    /// Create a retry policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            backoff_strategy: BackoffStrategy::Fixed,
            enable_jitter: false,
        }
    }

    /// A single attempt, never retried.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,

    /// Linear backoff (base + attempt * increment)
    Linear {
        /// Increment per attempt (in milliseconds)
        increment_ms: u64,
    },

    /// Exponential backoff (base * multiplier^attempt)
    Exponential {
        /// Multiplier for exponential growth
        multiplier: f64,
    },
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter, overridden by `RUST_LOG` when set
    pub level: LogLevel,

    /// Enable structured JSON logging
    pub json_format: bool,

    /// Enable colored output (ignored if json_format is true)
    pub colored: bool,

    /// Include timestamps in logs
    pub include_timestamps: bool,

    /// Include target module in logs
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            colored: true,
            include_timestamps: true,
            include_targets: false,
        }
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl AnvilConfig {
    /// Create a new configuration optimized for development.
    pub fn development() -> Self {
        Self {
            retry: RetryPolicy::fixed(3, 200),
            logging: LoggingConfig {
                level: LogLevel::Debug,
                colored: true,
                include_targets: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create a new configuration optimized for production.
    pub fn production() -> Self {
        Self {
            producer_failure_policy: ProducerFailurePolicy::Strict,
            retry: RetryPolicy::exponential(10),
            logging: LoggingConfig {
                level: LogLevel::Info,
                json_format: true,
                colored: false,
                include_timestamps: true,
                include_targets: false,
            },
            ..Default::default()
        }
    }

    /// Create a configuration for testing.
    pub fn testing() -> Self {
        Self {
            retry: RetryPolicy::fixed(3, 1),
            memory: MemoryBackendConfig {
                max_queue_size: 100,
                poll_interval_ms: 5,
            },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                colored: false,
                include_timestamps: false,
                include_targets: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Build a configuration from environment variables on top of the defaults.
    ///
    /// Reads `JOB_QUEUES`, `SERVER_MODE`, `CRASH_IF_CANNOT_CONNECT_TO_JOB_QUEUE`
    /// and, with the `redis-queue` feature, `JOB_QUEUE_REDIS_URL`.
    pub fn from_env() -> AnvilResult<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("JOB_QUEUES") {
            config.job_queues = parse_job_queues(&raw)?;
        }
        if let Ok(mode) = std::env::var("SERVER_MODE") {
            config.server_mode = mode;
        }
        if let Ok(raw) = std::env::var("CRASH_IF_CANNOT_CONNECT_TO_JOB_QUEUE") {
            let crash = raw.trim().parse::<bool>().map_err(|_| {
                AnvilError::config(format!(
                    "CRASH_IF_CANNOT_CONNECT_TO_JOB_QUEUE must be true or false, got '{}'",
                    raw
                ))
            })?;
            config.producer_failure_policy = ProducerFailurePolicy::from_crash_flag(crash);
        }
        #[cfg(feature = "redis-queue")]
        if let Ok(url) = std::env::var("JOB_QUEUE_REDIS_URL") {
            config.redis.connection_string = url;
        }

        Ok(config)
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.retry.max_attempts == 0 {
            errors.push("Retry max attempts must be greater than 0".to_string());
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            errors.push("Retry max delay must be greater than or equal to base delay".to_string());
        }

        if self.memory.poll_interval_ms == 0 {
            errors.push("Memory poll interval must be greater than 0".to_string());
        }

        #[cfg(feature = "redis-queue")]
        if self.job_queues.contains(&BackendType::Redis) {
            if self.redis.connection_string.is_empty() {
                errors.push("Redis connection string must not be empty".to_string());
            }
            if self.redis.key_prefix.is_empty() {
                errors.push("Redis key prefix must not be empty".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AnvilConfig::default();
        assert_eq!(config.job_queues, vec![BackendType::Memory]);
        assert_eq!(config.producer_failure_policy, ProducerFailurePolicy::Lenient);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_validate() {
        assert!(AnvilConfig::development().validate().is_ok());
        assert!(AnvilConfig::testing().validate().is_ok());

        let production = AnvilConfig::production();
        assert_eq!(
            production.producer_failure_policy,
            ProducerFailurePolicy::Strict
        );
        assert!(production.logging.json_format);
        assert!(production.validate().is_ok());
    }

    #[test]
    fn test_parse_job_queues_trims_and_drops_empty() {
        let types = parse_job_queues(" memory , redis ,, ").unwrap();
        assert_eq!(types, vec![BackendType::Memory, BackendType::Redis]);

        assert!(parse_job_queues("").unwrap().is_empty());
        assert!(parse_job_queues(" , ,").unwrap().is_empty());
    }

    #[test]
    fn test_parse_job_queues_rejects_unknown() {
        let error = parse_job_queues("memory,kafka").unwrap_err();
        assert!(matches!(error, AnvilError::ConfigError { .. }));
        assert!(error.to_string().contains("kafka"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = AnvilConfig::default();
        config.retry.max_attempts = 0;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("max attempts")));

        config.retry = RetryPolicy::fixed(1, 10);
        config.retry.max_delay_ms = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policies() {
        let exponential = RetryPolicy::exponential(5);
        assert_eq!(exponential.max_attempts, 5);
        assert!(matches!(
            exponential.backoff_strategy,
            BackoffStrategy::Exponential { .. }
        ));

        let linear = RetryPolicy::linear(3);
        assert!(matches!(
            linear.backoff_strategy,
            BackoffStrategy::Linear { .. }
        ));

        let fixed = RetryPolicy::fixed(2, 1000);
        assert_eq!(fixed.base_delay_ms, 1000);
        assert!(!fixed.enable_jitter);

        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }

    #[test]
    fn test_crash_flag_policy() {
        assert_eq!(
            ProducerFailurePolicy::from_crash_flag(true),
            ProducerFailurePolicy::Strict
        );
        assert_eq!(
            ProducerFailurePolicy::from_crash_flag(false),
            ProducerFailurePolicy::Lenient
        );
    }

    #[test]
    fn test_config_serde() {
        let json = serde_json::to_value(AnvilConfig::default()).unwrap();
        assert_eq!(json["job_queues"], serde_json::json!(["memory"]));
        assert_eq!(json["producer_failure_policy"], "lenient");

        let parsed: AnvilConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.job_queues, vec![BackendType::Memory]);
    }

    #[test]
    fn test_from_env() {
        const VARS: [&str; 3] = [
            "JOB_QUEUES",
            "SERVER_MODE",
            "CRASH_IF_CANNOT_CONNECT_TO_JOB_QUEUE",
        ];
        // Only this test touches these variables.
        unsafe {
            std::env::set_var("JOB_QUEUES", " redis , memory ,, ");
            std::env::set_var("SERVER_MODE", "async-worker");
            std::env::set_var("CRASH_IF_CANNOT_CONNECT_TO_JOB_QUEUE", "true");
        }
        let config = AnvilConfig::from_env().unwrap();
        assert_eq!(config.job_queues, vec![BackendType::Redis, BackendType::Memory]);
        assert_eq!(config.server_mode, "async-worker");
        assert_eq!(config.producer_failure_policy, ProducerFailurePolicy::Strict);

        unsafe {
            std::env::set_var("CRASH_IF_CANNOT_CONNECT_TO_JOB_QUEUE", "false");
        }
        let config = AnvilConfig::from_env().unwrap();
        assert_eq!(config.producer_failure_policy, ProducerFailurePolicy::Lenient);

        unsafe {
            std::env::set_var("CRASH_IF_CANNOT_CONNECT_TO_JOB_QUEUE", "sometimes");
        }
        let error = AnvilConfig::from_env().unwrap_err();
        assert!(matches!(error, AnvilError::ConfigError { .. }));
        assert!(error.to_string().contains("sometimes"));

        unsafe {
            std::env::set_var("CRASH_IF_CANNOT_CONNECT_TO_JOB_QUEUE", "true");
            std::env::set_var("JOB_QUEUES", "memory,kafka");
        }
        assert!(AnvilConfig::from_env().is_err());

        for var in VARS {
            unsafe { std::env::remove_var(var) };
        }
        let config = AnvilConfig::from_env().unwrap();
        assert_eq!(config.job_queues, vec![BackendType::Memory]);
        assert_eq!(config.producer_failure_policy, ProducerFailurePolicy::Lenient);
    }
}
