//! Redis queue backend for AnvilQ.
//!
//! This backend uses Redis lists as the storage layer, so several processes
//! can produce to and consume from the same queue.
//!
//! # Layout
//!
//! - `{prefix}:pending` - list of due jobs (`LPUSH` to produce, `RPOP` to consume)
//! - `{prefix}:delayed` - sorted set of jobs not yet due, scored by due time in ms
//! - `{prefix}:seq` - counter that makes every delayed member unique
//!
//! Delayed members are stored as `{seq}:{job}` so identical jobs due at the
//! same millisecond stay distinct; the sequence is stripped on promotion.

use super::{BackendType, JobQueueBackend, StoredJob, dispatch_job};
use crate::config::RedisConfig;
use crate::error::{AnvilError, AnvilResult};
use crate::job::{EnqueuedJob, JobHandlers, now_millis};
use async_trait::async_trait;

use ::redis::{AsyncCommands, Client, Script, aio::ConnectionManager};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Moves up to 100 due jobs from the delayed set onto the pending list.
const PROMOTE_DUE_SCRIPT: &str = r#"
local delayed_key = KEYS[1]
local pending_key = KEYS[2]
local now = tonumber(ARGV[1])

local ready = redis.call('ZRANGEBYSCORE', delayed_key, 0, now, 'LIMIT', 0, 100)
for i = 1, #ready do
    redis.call('ZREM', delayed_key, ready[i])
    local job = string.gsub(ready[i], '^%d+:', '', 1)
    redis.call('LPUSH', pending_key, job)
end

return #ready
"#;

struct ConsumerTask {
    stop: Arc<AtomicBool>,
    wake: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Redis queue backend implementation
pub struct RedisBackend {
    client: Client,
    config: RedisConfig,
    producer: RwLock<Option<ConnectionManager>>,
    paused: Arc<AtomicBool>,
    consumer: Mutex<Option<ConsumerTask>>,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("config", &self.config)
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct RedisKeys {
    pending: String,
    delayed: String,
    sequence: String,
}

impl RedisKeys {
    fn new(prefix: &str) -> Self {
        Self {
            pending: format!("{}:pending", prefix),
            delayed: format!("{}:delayed", prefix),
            sequence: format!("{}:seq", prefix),
        }
    }
}

impl RedisBackend {
    /// Create a Redis backend. No connection is made until `connect_producer`
    /// or `start_consumer`.
    pub fn new(config: RedisConfig) -> AnvilResult<Self> {
        let client = Client::open(config.connection_string.as_str())
            .map_err(|e| AnvilError::queue("Failed to create Redis client", e))?;

        Ok(Self {
            client,
            config,
            producer: RwLock::new(None),
            paused: Arc::new(AtomicBool::new(false)),
            consumer: Mutex::new(None),
        })
    }

    fn keys(&self) -> RedisKeys {
        RedisKeys::new(&self.config.key_prefix)
    }

    async fn open_connection(&self) -> AnvilResult<ConnectionManager> {
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);
        timeout(connect_timeout, self.client.get_connection_manager())
            .await
            .map_err(|e| AnvilError::queue("Timed out connecting to Redis", e))?
            .map_err(|e| AnvilError::queue("Failed to create Redis connection manager", e))
    }

    /// Number of due jobs waiting in Redis.
    pub async fn pending_len(&self) -> AnvilResult<u64> {
        let mut conn = self.producer_connection().await?;
        Ok(conn.llen(&self.keys().pending).await?)
    }

    /// Number of delayed jobs waiting in Redis.
    pub async fn delayed_len(&self) -> AnvilResult<u64> {
        let mut conn = self.producer_connection().await?;
        Ok(conn.zcard(&self.keys().delayed).await?)
    }

    async fn producer_connection(&self) -> AnvilResult<ConnectionManager> {
        self.producer
            .read()
            .await
            .clone()
            .ok_or(AnvilError::NotConnected {
                backend: BackendType::Redis,
            })
    }

    async fn promote_due(conn: &mut ConnectionManager, keys: &RedisKeys) -> AnvilResult<i64> {
        Script::new(PROMOTE_DUE_SCRIPT)
            .key(&keys.delayed)
            .key(&keys.pending)
            .arg(now_millis())
            .invoke_async(conn)
            .await
            .map_err(|e| AnvilError::queue("Failed to promote delayed jobs", e))
    }

    async fn next_job(conn: &mut ConnectionManager, keys: &RedisKeys) -> AnvilResult<Option<String>> {
        Ok(conn.rpop(&keys.pending, None).await?)
    }

    async fn consume_loop(
        mut conn: ConnectionManager,
        keys: RedisKeys,
        handlers: JobHandlers,
        paused: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
        wake: Arc<Notify>,
        poll_interval: Duration,
    ) {
        info!("Redis job queue consumer started on {}", keys.pending);

        while !stop.load(Ordering::SeqCst) {
            let mut idle = true;

            if !paused.load(Ordering::SeqCst) {
                match Self::promote_due(&mut conn, &keys).await {
                    Ok(moved) if moved > 0 => debug!("Promoted {} delayed jobs", moved),
                    Ok(_) => {}
                    Err(e) => error!("{}", e),
                }

                match Self::next_job(&mut conn, &keys).await {
                    Ok(Some(raw)) => {
                        idle = false;
                        match serde_json::from_str::<StoredJob>(&raw) {
                            Ok(stored) => dispatch_job(BackendType::Redis, &handlers, stored).await,
                            Err(e) => warn!("Dropping malformed job from Redis: {}", e),
                        }
                    }
                    Ok(None) => {}
                    Err(e) => error!("{}", e),
                }
            }

            if idle {
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = sleep(poll_interval) => {}
                }
            }
        }

        info!("Redis job queue consumer stopped");
    }
}

fn delayed_member(seq: u64, payload: &str) -> String {
    format!("{}:{}", seq, payload)
}

#[async_trait]
impl JobQueueBackend for RedisBackend {
    async fn connect_producer(&self) -> AnvilResult<()> {
        let conn = self.open_connection().await?;
        *self.producer.write().await = Some(conn);
        info!("Connected Redis job queue producer");
        Ok(())
    }

    async fn enqueue(&self, job_name: &str, job: &EnqueuedJob) -> AnvilResult<()> {
        let mut conn = self.producer_connection().await?;
        let keys = self.keys();
        let payload = serde_json::to_string(&StoredJob {
            job_name: job_name.to_string(),
            job: job.clone(),
        })?;

        if job.is_due(now_millis()) {
            conn.lpush::<_, _, ()>(&keys.pending, payload)
                .await
                .map_err(|e| AnvilError::queue("Failed to enqueue job", e))?;
        } else {
            let seq: u64 = conn.incr(&keys.sequence, 1).await?;
            conn.zadd::<_, _, _, ()>(&keys.delayed, delayed_member(seq, &payload), job.timestamp())
                .await?;
        }

        debug!("Enqueued job {} on Redis queue", job_name);
        Ok(())
    }

    async fn disconnect_producer(&self) -> AnvilResult<()> {
        if self.producer.write().await.take().is_some() {
            info!("Disconnected Redis job queue producer");
        }
        Ok(())
    }

    async fn start_consumer(&self, handlers: JobHandlers) -> AnvilResult<()> {
        let mut consumer = self.consumer.lock().await;
        if consumer.is_some() {
            return Err(AnvilError::QueueError {
                message: "Redis job queue consumer is already running".to_string(),
                source: None,
            });
        }

        let conn = self.open_connection().await?;
        let stop = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let handle = tokio::spawn(Self::consume_loop(
            conn,
            self.keys(),
            handlers,
            Arc::clone(&self.paused),
            Arc::clone(&stop),
            Arc::clone(&wake),
            Duration::from_millis(self.config.poll_interval_ms.max(1)),
        ));

        *consumer = Some(ConsumerTask { stop, wake, handle });
        Ok(())
    }

    async fn stop_consumer(&self) -> AnvilResult<()> {
        let Some(task) = self.consumer.lock().await.take() else {
            return Ok(());
        };

        task.stop.store(true, Ordering::SeqCst);
        task.wake.notify_one();
        task.handle
            .await
            .map_err(|e| AnvilError::queue("Redis job queue consumer panicked", e))
    }

    async fn pause_consumer(&self) -> AnvilResult<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume_consumer(&self) -> AnvilResult<()> {
        self.paused.store(false, Ordering::SeqCst);
        if let Some(task) = self.consumer.lock().await.as_ref() {
            task.wake.notify_one();
        }
        Ok(())
    }

    fn is_consumer_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::handler_fn;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn test_config(prefix: &str) -> RedisConfig {
        RedisConfig {
            connection_string: "redis://localhost:6379".to_string(),
            key_prefix: format!("anvilq-test-{}-{}", prefix, now_millis()),
            poll_interval_ms: 10,
            connect_timeout_secs: 2,
        }
    }

    #[test]
    fn test_invalid_connection_string() {
        let config = RedisConfig {
            connection_string: "not a url".to_string(),
            ..Default::default()
        };
        assert!(RedisBackend::new(config).is_err());
    }

    #[tokio::test]
    async fn test_enqueue_requires_connected_producer() {
        let backend = RedisBackend::new(test_config("unconnected")).unwrap();
        let job = EnqueuedJob::scheduled("exportData", json!({}));
        let error = backend.enqueue("exportData", &job).await.unwrap_err();
        assert!(matches!(error, AnvilError::NotConnected { .. }));
    }

    #[test]
    fn test_delayed_members_are_unique_per_sequence() {
        let payload = r#"{"jobName":"flush","job":{"eventPayload":{},"timestamp":5}}"#;
        let first = delayed_member(1, payload);
        let second = delayed_member(2, payload);
        assert_ne!(first, second);
        assert!(first.ends_with(payload));
        assert!(first.starts_with("1:"));
    }

    // Note: These tests require a running Redis instance
    // They are integration tests and should be run with: cargo test --features redis-queue -- --ignored

    #[tokio::test]
    #[ignore] // Ignore by default since it requires Redis
    async fn test_redis_enqueue_and_consume() {
        let backend = RedisBackend::new(test_config("consume")).unwrap();
        backend.connect_producer().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handlers = JobHandlers::new().with(
            "exportData",
            handler_fn(move |job| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(job);
                    Ok(())
                }
            }),
        );
        backend.start_consumer(handlers).await.unwrap();

        let job = EnqueuedJob::scheduled("exportData", json!({"table": "events"}));
        backend.enqueue("exportData", &job).await.unwrap();

        let received = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, job);

        backend.stop_consumer().await.unwrap();
        backend.disconnect_producer().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_delayed_job_not_pending() {
        let backend = RedisBackend::new(test_config("delayed")).unwrap();
        backend.connect_producer().await.unwrap();

        let job = EnqueuedJob::buffer(json!({"event": "signup"})).delayed_by(Duration::from_secs(60));
        backend.enqueue("flush", &job).await.unwrap();
        backend.enqueue("flush", &job).await.unwrap();
        assert_eq!(backend.pending_len().await.unwrap(), 0);
        assert_eq!(backend.delayed_len().await.unwrap(), 2);

        backend.disconnect_producer().await.unwrap();
    }
}
