//! Error types for AnvilQ operations.

use crate::queue::BackendType;
use thiserror::Error;

/// Result type used throughout AnvilQ.
pub type AnvilResult<T> = Result<T, AnvilError>;

/// Main error type for AnvilQ operations.
#[derive(Error, Debug)]
pub enum AnvilError {
    /// One or more backends failed to activate their producer under the strict policy
    #[error("Failed to connect producer for job queue(s): {}", BackendType::join(.backends))]
    BackendConnectFailure {
        /// Backends whose producer could not be connected
        backends: Vec<BackendType>,
    },

    /// A single backend rejected a job during failover
    #[error("Job queue '{backend}' failed to enqueue job: {message}")]
    BackendEnqueueFailure {
        /// The backend that rejected the job
        backend: BackendType,
        /// Error message
        message: String,
        /// Underlying backend error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Every active backend failed within one failover pass
    #[error("No job queue available to enqueue job '{job_name}'")]
    NoBackendAvailable {
        /// Name of the job that could not be enqueued
        job_name: String,
    },

    /// The retry executor gave up
    #[error("Exhausted {attempts} attempt(s): {last_error}")]
    RetryBudgetExhausted {
        /// Number of attempts made
        attempts: u32,
        /// The error returned by the final attempt
        #[source]
        last_error: Box<AnvilError>,
    },

    /// A lifecycle call broadcast to all backends failed on some of them
    #[error("{operation} failed on {} job queue(s)", .failures.len())]
    Broadcast {
        /// Lifecycle operation name
        operation: &'static str,
        /// Failing backend and its error message
        failures: Vec<(BackendType, String)>,
    },

    /// No handler registered for a consumed job
    #[error("No handler registered for job '{job_name}'")]
    HandlerNotFound {
        /// The job name that wasn't found
        job_name: String,
    },

    /// Backend used before its producer was connected
    #[error("Job queue '{backend}' producer is not connected")]
    NotConnected {
        /// The backend that is not connected
        backend: BackendType,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Queue backend error
    #[error("Queue error: {message}")]
    QueueError {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Error message
        message: String,
    },

    /// Redis connection error
    #[cfg(feature = "redis-queue")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl AnvilError {
    /// Create a new queue error
    pub fn queue<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::QueueError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Wrap a backend error as a failover-level enqueue failure
    pub fn enqueue_failure(backend: BackendType, error: AnvilError) -> Self {
        Self::BackendEnqueueFailure {
            backend,
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    /// Whether the retry executor should schedule another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoBackendAvailable { .. })
    }
}
