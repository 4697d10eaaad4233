//! Queue backends for AnvilQ.
//!
//! AnvilQ fans each enqueue out over an ordered list of backends:
//! - **In-Memory**: Fast, lightweight, perfect for development and single-process applications
//! - **Redis**: Distributed, persistent, ideal for multi-process/multi-server setups
//!
//! Every backend implements [`JobQueueBackend`]; the manager only ever talks
//! to backends through that trait.

use crate::error::{AnvilError, AnvilResult};
use crate::job::{EnqueuedJob, JobHandlers};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod memory;
pub use memory::InMemoryBackend;

#[cfg(feature = "redis-queue")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
pub mod redis;

#[cfg(feature = "redis-queue")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
pub use self::redis::RedisBackend;

/// Identifier of a concrete backend implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// In-process queue
    Memory,
    /// Redis list queue (requires the `redis-queue` feature to construct)
    Redis,
}

impl BackendType {
    /// Every known backend type.
    pub const ALL: [BackendType; 2] = [BackendType::Memory, BackendType::Redis];

    /// Configuration name of this backend type.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Memory => "memory",
            BackendType::Redis => "redis",
        }
    }

    /// Comma-joined configuration names, e.g. `memory,redis`.
    pub fn join(types: &[BackendType]) -> String {
        types
            .iter()
            .map(BackendType::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = AnvilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AnvilError::config(format!("Unknown job queue type '{}'", s.trim())))
    }
}

/// Trait that all queue backends must implement.
///
/// The producer side (`connect_producer`, `enqueue`, `disconnect_producer`)
/// and the consumer side (`start_consumer` and friends) are activated
/// independently.
#[async_trait]
pub trait JobQueueBackend: Send + Sync {
    /// Open the producer connection.
    async fn connect_producer(&self) -> AnvilResult<()>;

    /// Hand a job to this backend.
    async fn enqueue(&self, job_name: &str, job: &EnqueuedJob) -> AnvilResult<()>;

    /// Close the producer connection.
    async fn disconnect_producer(&self) -> AnvilResult<()>;

    /// Start consuming jobs, dispatching each to the handler registered for its name.
    async fn start_consumer(&self, handlers: JobHandlers) -> AnvilResult<()>;

    /// Stop consuming jobs.
    async fn stop_consumer(&self) -> AnvilResult<()>;

    /// Temporarily stop dispatching jobs.
    async fn pause_consumer(&self) -> AnvilResult<()>;

    /// Resume dispatching after a pause.
    async fn resume_consumer(&self) -> AnvilResult<()>;

    /// Whether the consumer is currently paused.
    fn is_consumer_paused(&self) -> bool;
}

/// A job together with the name it was enqueued under, as stored by backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredJob {
    /// Name used to look up the consumer handler
    #[serde(rename = "jobName")]
    pub job_name: String,
    /// The job itself
    pub job: EnqueuedJob,
}

/// Hand a consumed job to its handler.
///
/// Missing handlers and handler failures are logged; neither stops a consumer loop.
pub(crate) async fn dispatch_job(backend: BackendType, handlers: &JobHandlers, stored: StoredJob) {
    let Some(handler) = handlers.get(&stored.job_name) else {
        let error = AnvilError::HandlerNotFound {
            job_name: stored.job_name.clone(),
        };
        tracing::warn!(backend = %backend, "Dropping job: {}", error);
        return;
    };

    if let Err(e) = handler.handle(stored.job).await {
        tracing::error!(
            backend = %backend,
            job_name = %stored.job_name,
            "Job handler failed: {}",
            e
        );
    }
}
