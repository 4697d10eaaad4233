//! Job definitions and consumer handler traits.

use crate::error::AnvilResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Job type reported for buffer jobs, which carry no `type` field.
pub const BUFFER_JOB_TYPE: &str = "buffer";

/// A job scheduled by name with an arbitrary JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledJob {
    /// Job type identifier
    #[serde(rename = "type")]
    pub job_type: String,
    /// Opaque job payload
    pub payload: serde_json::Value,
    /// When the job becomes due, in milliseconds since the UNIX epoch
    pub timestamp: u64,
}

/// A buffered event waiting to be flushed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BufferJob {
    /// Opaque event payload
    #[serde(rename = "eventPayload")]
    pub event_payload: serde_json::Value,
    /// When the job becomes due, in milliseconds since the UNIX epoch
    pub timestamp: u64,
}

/// A job as handed to the queue backends.
///
/// Serialized untagged, so the wire shape is either
/// `{"type", "payload", "timestamp"}` or `{"eventPayload", "timestamp"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EnqueuedJob {
    /// Named job with a payload
    Scheduled(ScheduledJob),
    /// Buffered event
    Buffer(BufferJob),
}

impl EnqueuedJob {
    /// Create a scheduled job due now.
    pub fn scheduled(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Scheduled(ScheduledJob {
            job_type: job_type.into(),
            payload,
            timestamp: now_millis(),
        })
    }

    /// Create a buffer job due now.
    pub fn buffer(event_payload: serde_json::Value) -> Self {
        Self::Buffer(BufferJob {
            event_payload,
            timestamp: now_millis(),
        })
    }

    /// Push the due time `delay` into the future.
    pub fn delayed_by(mut self, delay: Duration) -> Self {
        let due = now_millis().saturating_add(delay.as_millis() as u64);
        match &mut self {
            Self::Scheduled(job) => job.timestamp = due,
            Self::Buffer(job) => job.timestamp = due,
        }
        self
    }

    /// Job type used for metrics and logging.
    pub fn job_type(&self) -> &str {
        match self {
            Self::Scheduled(job) => &job.job_type,
            Self::Buffer(_) => BUFFER_JOB_TYPE,
        }
    }

    /// The opaque payload, whichever shape the job has.
    pub fn job_payload(&self) -> &serde_json::Value {
        match self {
            Self::Scheduled(job) => &job.payload,
            Self::Buffer(job) => &job.event_payload,
        }
    }

    /// When the job becomes due, in milliseconds since the UNIX epoch.
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Scheduled(job) => job.timestamp,
            Self::Buffer(job) => job.timestamp,
        }
    }

    /// Whether the job is due at `now_ms`.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.timestamp() <= now_ms
    }

    /// JSON rendering for logs and error reports.
    pub fn to_log_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("<unserializable job: {}>", e))
    }
}

/// Correlation labels supplied by the caller of `enqueue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentationContext {
    /// Caller key
    pub key: String,
    /// Caller tag
    pub tag: String,
}

impl InstrumentationContext {
    /// Create a context with both labels set.
    pub fn new(key: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            tag: tag.into(),
        }
    }
}

impl Default for InstrumentationContext {
    fn default() -> Self {
        Self {
            key: "?".to_string(),
            tag: "?".to_string(),
        }
    }
}

/// Handles jobs of one job name on the consumer side.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process a single job.
    async fn handle(&self, job: EnqueuedJob) -> AnvilResult<()>;
}

/// Adapter turning an async closure into a [`JobHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(EnqueuedJob) -> Fut + Send + Sync,
    Fut: Future<Output = AnvilResult<()>> + Send + 'static,
{
    async fn handle(&self, job: EnqueuedJob) -> AnvilResult<()> {
        (self.0)(job).await
    }
}

/// Build a handler from an async closure.
///
/// ```rust
/// use anvilq::job::{handler_fn, JobHandlers};
///
/// let handlers = JobHandlers::new().with("sendReport", handler_fn(|job| async move {
///     tracing::info!("report payload: {}", job.job_payload());
///     Ok(())
/// }));
/// assert!(handlers.get("sendReport").is_some());
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(EnqueuedJob) -> Fut + Send + Sync,
    Fut: Future<Output = AnvilResult<()>> + Send + 'static,
{
    FnHandler(f)
}

/// Mapping from job name to its consumer handler.
///
/// Cheap to clone; every backend receives its own copy on `start_consumer`.
#[derive(Clone, Default)]
pub struct JobHandlers {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlers {
    /// Create an empty handler set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `job_name`, replacing any previous one.
    pub fn register<H: JobHandler + 'static>(&mut self, job_name: impl Into<String>, handler: H) {
        self.handlers.insert(job_name.into(), Arc::new(handler));
    }

    /// Builder form of [`JobHandlers::register`].
    pub fn with<H: JobHandler + 'static>(mut self, job_name: impl Into<String>, handler: H) -> Self {
        self.register(job_name, handler);
        self
    }

    /// Look up the handler for `job_name`.
    pub fn get(&self, job_name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_name).cloned()
    }

    /// Registered job names, sorted.
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for JobHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandlers")
            .field("job_names", &self.job_names())
            .finish()
    }
}

/// Current time in milliseconds since the UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
