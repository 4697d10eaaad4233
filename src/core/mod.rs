//! The job queue manager.
//!
//! [`JobQueueManager`] is the heart of AnvilQ: it owns the ordered list of
//! active backends, fans producer and consumer lifecycle calls out to all of
//! them, and routes each enqueue through a first-success-wins failover pass
//! wrapped in bounded retry.

use crate::config::{AnvilConfig, ProducerFailurePolicy};
use crate::error::{AnvilError, AnvilResult};
use crate::job::{EnqueuedJob, InstrumentationContext, JobHandlers};
use crate::metrics::{MetricsSink, NoopMetrics, instrument};
use crate::queue::{BackendType, JobQueueBackend};
use crate::reporting::{ErrorReport, ErrorReporter, ReportKind, TracingErrorReporter};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod registry;
pub mod retry;

pub use registry::{ActiveBackend, BackendFactory, BackendRegistry, get_registry};
pub use retry::{RetryOutcome, RetrySpec, retry_if_retryable};

/// Metric name shared by the enqueue timing and counters.
const ENQUEUE_METRIC: &str = "enqueue_job";

/// Fans job enqueue and consumer lifecycle out over an ordered list of backends.
///
/// # Examples
///
/// ```rust
/// use anvilq::prelude::*;
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> AnvilResult<()> {
///     let manager = JobQueueManager::from_config(AnvilConfig::testing())?;
///     manager.connect_producer().await?;
///
///     let job = EnqueuedJob::scheduled("exportData", json!({"table": "events"}));
///     manager.enqueue("exportData", &job, None).await;
///
///     manager.disconnect_producer().await?;
///     Ok(())
/// }
/// ```
pub struct JobQueueManager {
    config: AnvilConfig,
    configured: Vec<BackendType>,
    active: RwLock<Vec<ActiveBackend>>,
    metrics: Arc<dyn MetricsSink>,
    reporter: Arc<dyn ErrorReporter>,
}

impl JobQueueManager {
    /// Create a manager whose backends come from the builtin registry.
    pub fn new(
        config: AnvilConfig,
        metrics: Arc<dyn MetricsSink>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> AnvilResult<Self> {
        Self::with_registry(config, get_registry(), metrics, reporter)
    }

    /// Create a manager with no metrics and tracing-based error reporting.
    pub fn from_config(config: AnvilConfig) -> AnvilResult<Self> {
        Self::new(
            config,
            Arc::new(NoopMetrics),
            Arc::new(TracingErrorReporter),
        )
    }

    /// Create a manager whose backends come from a custom registry.
    pub fn with_registry(
        config: AnvilConfig,
        registry: &BackendRegistry,
        metrics: Arc<dyn MetricsSink>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> AnvilResult<Self> {
        if let Err(errors) = config.validate() {
            return Err(AnvilError::config(errors.join("; ")));
        }

        let backends = registry.resolve(&config)?;
        tracing::info!(
            "Job queue manager created with job queue(s): {}",
            BackendType::join(&config.job_queues)
        );

        Ok(Self {
            configured: config.job_queues.clone(),
            active: RwLock::new(backends),
            config,
            metrics,
            reporter,
        })
    }

    /// Create a manager around already-built backends.
    ///
    /// `config.job_queues` is ignored; the order of `backends` is the
    /// failover order.
    pub fn with_backends(
        config: AnvilConfig,
        backends: Vec<ActiveBackend>,
        metrics: Arc<dyn MetricsSink>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            configured: backends.iter().map(|active| active.backend_type).collect(),
            active: RwLock::new(backends),
            config,
            metrics,
            reporter,
        }
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &AnvilConfig {
        &self.config
    }

    /// Comma-joined list of the configured backend types.
    pub fn job_queue_types_as_string(&self) -> String {
        BackendType::join(&self.configured)
    }

    /// Backend types that are still active after any pruning.
    pub async fn active_backend_types(&self) -> Vec<BackendType> {
        types_of(&self.active.read().await)
    }

    async fn active_backends(&self) -> Vec<ActiveBackend> {
        self.active.read().await.clone()
    }

    /// Connect the producer side of every active backend in parallel.
    ///
    /// Under [`ProducerFailurePolicy::Strict`] any failure is returned as
    /// [`AnvilError::BackendConnectFailure`] and nothing is pruned. Under
    /// [`ProducerFailurePolicy::Lenient`] failed backends are dropped from the
    /// active list and the call succeeds.
    pub async fn connect_producer(&self) -> AnvilResult<()> {
        let backends = self.active_backends().await;
        let types = types_of(&backends);

        let results = join_all(
            backends
                .iter()
                .map(|active| active.backend.connect_producer()),
        )
        .await;

        let mut failed = Vec::new();
        for (active, result) in backends.iter().zip(results) {
            if let Err(error) = result {
                self.reporter.report(&ErrorReport {
                    kind: ReportKind::BackendConnectFailure,
                    message: error.to_string(),
                    job: None,
                    failed_backend: Some(active.backend_type),
                    backends: types.clone(),
                });
                failed.push(active.clone());
            }
        }

        if failed.is_empty() {
            tracing::info!(
                "Connected producer for job queue(s): {}",
                BackendType::join(&types)
            );
            return Ok(());
        }

        match self.config.producer_failure_policy {
            ProducerFailurePolicy::Strict => {
                let backends = types_of(&failed);
                tracing::error!(
                    "Failed to connect producer for job queue(s): {}",
                    BackendType::join(&backends)
                );
                Err(AnvilError::BackendConnectFailure { backends })
            }
            ProducerFailurePolicy::Lenient => {
                for pruned in &failed {
                    tracing::warn!(
                        backend = %pruned.backend_type,
                        "Could not connect producer, removing job queue from the active list"
                    );
                }

                let mut active = self.active.write().await;
                active.retain(|candidate| {
                    !failed
                        .iter()
                        .any(|pruned| Arc::ptr_eq(&pruned.backend, &candidate.backend))
                });

                if active.is_empty() {
                    tracing::warn!("No job queue left after connecting producers");
                } else {
                    tracing::info!(
                        "Connected producer for job queue(s): {}",
                        BackendType::join(&types_of(&active))
                    );
                }
                Ok(())
            }
        }
    }

    /// Enqueue a job, failing over across backends and retrying whole passes.
    ///
    /// Never returns an error: once the retry budget is spent the failure is
    /// logged and reported, and the `outcome` tag of the `enqueue_job` timing
    /// is set to `exhausted`.
    pub async fn enqueue(
        &self,
        job_name: &str,
        job: &EnqueuedJob,
        ctx: Option<InstrumentationContext>,
    ) {
        let ctx = ctx.unwrap_or_default();
        let serialized = job.to_log_string();

        let timing_tags = [
            ("jobName", job_name),
            ("jobType", job.job_type()),
            ("key", ctx.key.as_str()),
            ("tag", ctx.tag.as_str()),
        ];
        let retry_tags = [
            ("serverMode", self.config.server_mode.as_str()),
            ("jobName", job_name),
        ];
        let spec = RetrySpec {
            metric_name: ENQUEUE_METRIC,
            tags: &retry_tags,
            context: &serialized,
        };

        let work = retry_if_retryable(
            &self.config.retry,
            self.metrics.as_ref(),
            spec,
            move |_attempt| self.enqueue_with_failover(job_name, job),
            |error| {
                tracing::error!(
                    job = %serialized,
                    "Failed to enqueue job '{}', exhausted attempts: {}",
                    job_name,
                    error
                );
            },
        );

        instrument(
            self.metrics.as_ref(),
            ENQUEUE_METRIC,
            &timing_tags,
            RetryOutcome::label,
            work,
        )
        .await;
    }

    /// One failover pass: try each active backend in order until one accepts.
    async fn enqueue_with_failover(&self, job_name: &str, job: &EnqueuedJob) -> AnvilResult<()> {
        let backends = self.active_backends().await;
        let types = types_of(&backends);

        for active in &backends {
            match active.backend.enqueue(job_name, job).await {
                Ok(()) => {
                    tracing::debug!(
                        backend = %active.backend_type,
                        "Enqueued job '{}'",
                        job_name
                    );
                    self.metrics
                        .increment(&format!("{}.success", ENQUEUE_METRIC), &[("jobName", job_name)]);
                    return Ok(());
                }
                Err(error) => {
                    let error = AnvilError::enqueue_failure(active.backend_type, error);
                    tracing::warn!("{}, trying next job queue", error);
                    self.reporter.report(&ErrorReport {
                        kind: ReportKind::BackendEnqueueFailure,
                        message: error.to_string(),
                        job: Some(job.to_log_string()),
                        failed_backend: Some(active.backend_type),
                        backends: types.clone(),
                    });
                }
            }
        }

        self.metrics
            .increment(&format!("{}.fail", ENQUEUE_METRIC), &[("jobName", job_name)]);

        let error = AnvilError::NoBackendAvailable {
            job_name: job_name.to_string(),
        };
        self.reporter.report(&ErrorReport {
            kind: ReportKind::NoBackendAvailable,
            message: error.to_string(),
            job: Some(job.to_log_string()),
            failed_backend: None,
            backends: types.clone(),
        });
        tracing::warn!(
            backends = %BackendType::join(&types),
            "Failed to enqueue job '{}' on any job queue",
            job_name
        );

        Err(error)
    }

    /// Disconnect the producer side of every active backend.
    pub async fn disconnect_producer(&self) -> AnvilResult<()> {
        self.broadcast("disconnect_producer", |backend| async move {
            backend.disconnect_producer().await
        })
        .await
    }

    /// Start consuming on every active backend with the same handler set.
    pub async fn start_consumer(&self, handlers: JobHandlers) -> AnvilResult<()> {
        let handlers = &handlers;
        self.broadcast("start_consumer", |backend| {
            let handlers = handlers.clone();
            async move { backend.start_consumer(handlers).await }
        })
        .await
    }

    /// Stop consuming on every active backend.
    pub async fn stop_consumer(&self) -> AnvilResult<()> {
        self.broadcast("stop_consumer", |backend| async move {
            backend.stop_consumer().await
        })
        .await
    }

    /// Pause consumption on every active backend.
    pub async fn pause_consumer(&self) -> AnvilResult<()> {
        self.broadcast("pause_consumer", |backend| async move {
            backend.pause_consumer().await
        })
        .await
    }

    /// Resume consumption on every active backend.
    pub async fn resume_consumer(&self) -> AnvilResult<()> {
        self.broadcast("resume_consumer", |backend| async move {
            backend.resume_consumer().await
        })
        .await
    }

    /// Whether any active backend reports its consumer paused.
    pub async fn is_consumer_paused(&self) -> bool {
        self.active
            .read()
            .await
            .iter()
            .any(|active| active.backend.is_consumer_paused())
    }

    /// Stop consuming, then disconnect producers.
    ///
    /// Both steps always run; the first error is returned.
    pub async fn shutdown(&self) -> AnvilResult<()> {
        tracing::info!("Shutting down job queue manager");
        let stopped = self.stop_consumer().await;
        let disconnected = self.disconnect_producer().await;
        stopped.and(disconnected)
    }

    /// Block until Ctrl+C, then [`shutdown`](Self::shutdown).
    pub async fn wait_for_shutdown(&self) -> AnvilResult<()> {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
        } else {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        self.shutdown().await
    }

    /// Run a lifecycle call on every active backend in parallel.
    ///
    /// Every backend is called even if some fail; failures are reported one by
    /// one and then returned together.
    async fn broadcast<F, Fut>(&self, operation: &'static str, call: F) -> AnvilResult<()>
    where
        F: Fn(Arc<dyn JobQueueBackend>) -> Fut,
        Fut: Future<Output = AnvilResult<()>>,
    {
        let backends = self.active_backends().await;
        let types = types_of(&backends);

        let results = join_all(
            backends
                .iter()
                .map(|active| call(Arc::clone(&active.backend))),
        )
        .await;

        let mut failures = Vec::new();
        for (active, result) in backends.iter().zip(results) {
            if let Err(error) = result {
                tracing::error!(
                    backend = %active.backend_type,
                    "{} failed: {}",
                    operation,
                    error
                );
                self.reporter.report(&ErrorReport {
                    kind: ReportKind::LifecycleFailure,
                    message: error.to_string(),
                    job: None,
                    failed_backend: Some(active.backend_type),
                    backends: types.clone(),
                });
                failures.push((active.backend_type, error.to_string()));
            }
        }

        if failures.is_empty() {
            tracing::debug!("{} succeeded on {} job queue(s)", operation, backends.len());
            Ok(())
        } else {
            Err(AnvilError::Broadcast {
                operation,
                failures,
            })
        }
    }
}

impl std::fmt::Debug for JobQueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueueManager")
            .field("configured", &self.configured)
            .field("server_mode", &self.config.server_mode)
            .finish_non_exhaustive()
    }
}

fn types_of(backends: &[ActiveBackend]) -> Vec<BackendType> {
    backends.iter().map(|active| active.backend_type).collect()
}
