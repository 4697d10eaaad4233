//! In-memory queue backend for AnvilQ.
//!
//! Jobs live in process memory: a FIFO of due jobs plus a delayed set ordered
//! by due time. Perfect for development, tests and single-process setups where
//! losing queued jobs on restart is acceptable.

use super::{BackendType, JobQueueBackend, StoredJob, dispatch_job};
use crate::config::MemoryBackendConfig;
use crate::error::{AnvilError, AnvilResult};
use crate::job::{EnqueuedJob, JobHandlers, now_millis};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Debug, Default)]
struct MemoryState {
    /// Due jobs in arrival order
    pending: VecDeque<StoredJob>,
    /// Jobs not yet due, sorted by timestamp
    delayed: Vec<StoredJob>,
}

impl MemoryState {
    fn len(&self) -> usize {
        self.pending.len() + self.delayed.len()
    }

    fn push(&mut self, stored: StoredJob, now_ms: u64) {
        if stored.job.is_due(now_ms) {
            self.pending.push_back(stored);
        } else {
            let at = self
                .delayed
                .partition_point(|held| held.job.timestamp() <= stored.job.timestamp());
            self.delayed.insert(at, stored);
        }
    }

    /// Move every delayed job that became due onto the pending FIFO.
    fn promote_due(&mut self, now_ms: u64) -> usize {
        let due = self.delayed.partition_point(|held| held.job.is_due(now_ms));
        let promoted: Vec<StoredJob> = self.delayed.drain(..due).collect();
        let count = promoted.len();
        self.pending.extend(promoted);
        count
    }
}

struct ConsumerTask {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// In-memory queue backend implementation
pub struct InMemoryBackend {
    config: MemoryBackendConfig,
    state: Arc<Mutex<MemoryState>>,
    producer_connected: AtomicBool,
    paused: Arc<AtomicBool>,
    wake: Arc<Notify>,
    consumer: Mutex<Option<ConsumerTask>>,
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("config", &self.config)
            .field("producer_connected", &self.producer_connected)
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}

impl InMemoryBackend {
    /// Create a new in-memory backend with default configuration
    pub fn new() -> Self {
        Self::with_config(MemoryBackendConfig::default())
    }

    /// Create a new in-memory backend with custom configuration
    pub fn with_config(config: MemoryBackendConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(MemoryState::default())),
            producer_connected: AtomicBool::new(false),
            paused: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            consumer: Mutex::new(None),
        }
    }

    /// Number of jobs currently held, due or delayed.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Whether no jobs are held.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of the held jobs, due jobs first.
    pub async fn jobs(&self) -> Vec<StoredJob> {
        let state = self.state.lock().await;
        state
            .pending
            .iter()
            .chain(state.delayed.iter())
            .cloned()
            .collect()
    }

    fn is_full(&self, state: &MemoryState) -> bool {
        self.config.max_queue_size != 0 && state.len() >= self.config.max_queue_size
    }

    async fn consume_loop(
        state: Arc<Mutex<MemoryState>>,
        handlers: JobHandlers,
        paused: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
        wake: Arc<Notify>,
        poll_interval: Duration,
    ) {
        tracing::info!("Memory job queue consumer started");

        while !stop.load(Ordering::SeqCst) {
            if !paused.load(Ordering::SeqCst) {
                loop {
                    if stop.load(Ordering::SeqCst) || paused.load(Ordering::SeqCst) {
                        break;
                    }

                    let next = {
                        let mut state = state.lock().await;
                        state.promote_due(now_millis());
                        state.pending.pop_front()
                    };

                    match next {
                        Some(stored) => dispatch_job(BackendType::Memory, &handlers, stored).await,
                        None => break,
                    }
                }
            }

            tokio::select! {
                _ = wake.notified() => {}
                _ = sleep(poll_interval) => {}
            }
        }

        tracing::info!("Memory job queue consumer stopped");
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueueBackend for InMemoryBackend {
    async fn connect_producer(&self) -> AnvilResult<()> {
        self.producer_connected.store(true, Ordering::SeqCst);
        tracing::debug!("Memory job queue producer connected");
        Ok(())
    }

    async fn enqueue(&self, job_name: &str, job: &EnqueuedJob) -> AnvilResult<()> {
        if !self.producer_connected.load(Ordering::SeqCst) {
            return Err(AnvilError::NotConnected {
                backend: BackendType::Memory,
            });
        }

        {
            let mut state = self.state.lock().await;
            if self.is_full(&state) {
                return Err(AnvilError::QueueError {
                    message: format!("Queue is full (max size: {})", self.config.max_queue_size),
                    source: None,
                });
            }

            state.push(
                StoredJob {
                    job_name: job_name.to_string(),
                    job: job.clone(),
                },
                now_millis(),
            );
        }

        self.wake.notify_one();
        tracing::debug!("Enqueued job {} on memory queue", job_name);
        Ok(())
    }

    async fn disconnect_producer(&self) -> AnvilResult<()> {
        self.producer_connected.store(false, Ordering::SeqCst);
        tracing::debug!("Memory job queue producer disconnected");
        Ok(())
    }

    async fn start_consumer(&self, handlers: JobHandlers) -> AnvilResult<()> {
        let mut consumer = self.consumer.lock().await;
        if consumer.is_some() {
            return Err(AnvilError::QueueError {
                message: "Memory job queue consumer is already running".to_string(),
                source: None,
            });
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(Self::consume_loop(
            Arc::clone(&self.state),
            handlers,
            Arc::clone(&self.paused),
            Arc::clone(&stop),
            Arc::clone(&self.wake),
            Duration::from_millis(self.config.poll_interval_ms.max(1)),
        ));

        *consumer = Some(ConsumerTask { stop, handle });
        Ok(())
    }

    async fn stop_consumer(&self) -> AnvilResult<()> {
        let Some(task) = self.consumer.lock().await.take() else {
            return Ok(());
        };

        task.stop.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        task.handle
            .await
            .map_err(|e| AnvilError::queue("Memory job queue consumer panicked", e))
    }

    async fn pause_consumer(&self) -> AnvilResult<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume_consumer(&self) -> AnvilResult<()> {
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_one();
        Ok(())
    }

    fn is_consumer_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}
