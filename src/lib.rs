//! # AnvilQ
//!
//! Failover job enqueueing across pluggable queue backends.
//!
//! ## Features
//!
//! - **Ordered Failover**: Each enqueue tries the configured backends in order and stops at the first that accepts
//! - **Bounded Retry**: Whole failover passes are retried with configurable backoff
//! - **Producer/Consumer Lifecycle**: Connect, start, pause, resume and stop every backend at once
//! - **Pluggable Backends**: In-memory out of the box, Redis behind the `redis-queue` feature
//! - **Observability**: `tracing` logs, structured error reports, optional Prometheus metrics
//!
//! ## Quick Start
//!
//! ```rust
//! use anvilq::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> AnvilResult<()> {
//!     let config = AnvilConfig::testing();
//!     let manager = JobQueueManager::from_config(config)?;
//!     manager.connect_producer().await?;
//!
//!     let handlers = JobHandlers::new().with(
//!         "sendReport",
//!         handler_fn(|job| async move {
//!             tracing::info!("sending report {}", job.job_payload());
//!             Ok(())
//!         }),
//!     );
//!     manager.start_consumer(handlers).await?;
//!
//!     let job = EnqueuedJob::scheduled("sendReport", json!({"reportId": 42}));
//!     manager
//!         .enqueue("sendReport", &job, Some(InstrumentationContext::new("team-7", "daily")))
//!         .await;
//!
//!     manager.shutdown().await
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod job;
pub mod logging;
pub mod metrics;
pub mod queue;
pub mod reporting;
pub mod utils;

pub mod prelude {
    pub use crate::config::*;
    pub use crate::core::{JobQueueManager, RetryOutcome};
    pub use crate::error::{AnvilError, AnvilResult};
    pub use crate::job::{
        EnqueuedJob, InstrumentationContext, JobHandler, JobHandlers, handler_fn,
    };
    pub use crate::logging::init_logging;
    pub use crate::metrics::{MetricsSink, NoopMetrics};
    pub use crate::queue::{BackendType, InMemoryBackend, JobQueueBackend};
    pub use crate::reporting::{ErrorReport, ErrorReporter, TracingErrorReporter};
    pub use async_trait::async_trait;

    #[cfg(feature = "redis-queue")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
    pub use crate::queue::RedisBackend;

    #[cfg(feature = "metrics")]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    pub use crate::metrics::PrometheusMetrics;
}

pub use crate::config::AnvilConfig;
pub use crate::core::JobQueueManager;
pub use crate::error::{AnvilError, AnvilResult};
pub use crate::job::{EnqueuedJob, InstrumentationContext, JobHandlers};
pub use crate::queue::{BackendType, JobQueueBackend};
