//! Queue service, worker, and retry scheduler.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::cache::{CacheError, CacheStore};

const PENDING_QUEUE: &str = "message_queue:pending";
const PROCESSING_QUEUE: &str = "message_queue:processing";
const FAILED_QUEUE: &str = "message_queue:failed";
const DELAYED_SET: &str = "message_queue:delayed";

/// Prefix for generated message ids.
const MESSAGE_ID_PREFIX: &str = "msg_";

/// A message in flight through the retry machine. Cache-resident only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: String,
    pub session_id: String,
    pub payload: serde_json::Value,
    /// Count of failed delivery attempts so far. Strictly increases.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry: Option<DateTime<Utc>>,
}

/// Named queues exposed to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueName {
    Pending,
    Processing,
    Failed,
}

impl QueueName {
    fn key(self) -> &'static str {
        match self {
            Self::Pending => PENDING_QUEUE,
            Self::Processing => PROCESSING_QUEUE,
            Self::Failed => FAILED_QUEUE,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Queue depths at a point in time.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
    pub delayed: u64,
}

/// Delivery failure. An expected outcome, handled by the retry machine.
#[derive(Debug, Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Downstream delivery seam the worker drives.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn deliver(&self, message: &QueuedMessage) -> Result<(), DeliveryError>;
}

/// Errors surfaced by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Retry and timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    /// Failed attempts after which a message is archived to `failed`.
    pub max_retries: u32,
    /// Base backoff delay; doubles per attempt.
    pub retry_delay: Duration,
    /// Bound on the worker's blocking pop.
    pub pop_timeout: Duration,
    /// Wait before restarting a crashed loop.
    pub worker_cooldown: Duration,
    /// How often the scheduler moves due delayed messages to pending.
    pub scheduler_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            pop_timeout: Duration::from_secs(5),
            worker_cooldown: Duration::from_secs(5),
            scheduler_interval: Duration::from_millis(250),
        }
    }
}

/// Reliable delivery service over cache-resident queues.
///
/// Cheap to clone; clones share the queues and the shutdown signal.
#[derive(Clone)]
pub struct MessageQueueService {
    cache: Arc<dyn CacheStore>,
    delivery: Arc<dyn DeliveryHandler>,
    settings: QueueSettings,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl MessageQueueService {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        delivery: Arc<dyn DeliveryHandler>,
        settings: QueueSettings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            cache,
            delivery,
            settings,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    // ------------------------------------------------------------------------
    // Public API
    // ------------------------------------------------------------------------

    /// Enqueue a message for delivery.
    pub async fn queue_message(
        &self,
        session_id: &str,
        payload: serde_json::Value,
    ) -> Result<QueuedMessage, QueueError> {
        let message = QueuedMessage {
            id: format!("{}{}", MESSAGE_ID_PREFIX, Ulid::new()),
            session_id: session_id.to_string(),
            payload,
            attempts: 0,
            created_at: Utc::now(),
            next_retry: None,
        };
        let raw = serde_json::to_string(&message)?;
        let depth = self.cache.queue_push(PENDING_QUEUE, raw).await?;
        debug!(message_id = %message.id, session_id, depth, "message queued");
        Ok(message)
    }

    /// Current queue depths.
    pub async fn get_queue_stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats {
            pending: self.cache.queue_len(PENDING_QUEUE).await?,
            processing: self.cache.queue_len(PROCESSING_QUEUE).await?,
            failed: self.cache.queue_len(FAILED_QUEUE).await?,
            delayed: self
                .cache
                .scored_range(DELAYED_SET, f64::MIN, f64::MAX)
                .await?
                .len() as u64,
        })
    }

    /// Move every archived failure back to `pending` with attempts reset.
    /// Returns the number of messages requeued.
    pub async fn retry_failed_messages(&self) -> Result<u64, QueueError> {
        let mut count = 0u64;
        while let Some(raw) = self.cache.queue_pop(FAILED_QUEUE).await? {
            let mut message: QueuedMessage = match serde_json::from_str(&raw) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "dropping unparseable failed-queue entry");
                    continue;
                }
            };
            message.attempts = 0;
            message.next_retry = None;
            let raw = serde_json::to_string(&message)?;
            self.cache.queue_push(PENDING_QUEUE, raw).await?;
            count += 1;
        }
        if count > 0 {
            info!(count, "failed messages queued for replay");
        }
        Ok(count)
    }

    /// Every in-flight message for a session, across all queues.
    pub async fn get_session_offline_messages(
        &self,
        session_id: &str,
    ) -> Result<Vec<QueuedMessage>, QueueError> {
        let mut raws = Vec::new();
        for queue in [PENDING_QUEUE, PROCESSING_QUEUE, FAILED_QUEUE] {
            raws.extend(self.cache.queue_all(queue).await?);
        }
        raws.extend(
            self.cache
                .scored_range(DELAYED_SET, f64::MIN, f64::MAX)
                .await?,
        );

        Ok(raws
            .iter()
            .filter_map(|raw| serde_json::from_str::<QueuedMessage>(raw).ok())
            .filter(|m| m.session_id == session_id)
            .collect())
    }

    /// Empty a named queue. Returns the number of entries removed.
    pub async fn clear_queue(&self, name: QueueName) -> Result<u64, QueueError> {
        let removed = self.cache.queue_clear(name.key()).await?;
        info!(queue = %name, removed, "queue cleared");
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Background loops
    // ------------------------------------------------------------------------

    /// Spawn the worker and the retry scheduler.
    ///
    /// Both loops are supervised: an uncaught failure logs, waits out the
    /// cooldown, and restarts the loop.
    pub async fn start(&self) {
        let worker = {
            let svc = self.clone();
            tokio::spawn(async move { svc.supervise("queue_worker", Self::run_worker).await })
        };
        let scheduler = {
            let svc = self.clone();
            tokio::spawn(
                async move { svc.supervise("retry_scheduler", Self::run_scheduler).await },
            )
        };
        let mut tasks = self.tasks.lock().await;
        tasks.push(worker);
        tasks.push(scheduler);
    }

    /// Stop both loops and wait for them to finish.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send(true).is_err() {
            warn!("queue shutdown signal had no receivers");
        }
        let handles = {
            let mut tasks = self.tasks.lock().await;
            std::mem::take(&mut *tasks)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = ?e, "queue task panicked during shutdown");
            }
        }
        info!("message queue shutdown complete");
    }

    async fn supervise<F, Fut>(&self, name: &'static str, run: F)
    where
        F: Fn(Self, watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = Result<(), QueueError>>,
    {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            match run(self.clone(), shutdown.clone()).await {
                Ok(()) => break,
                Err(e) => {
                    error!(task = name, error = %e, "loop crashed, restarting after cooldown");
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.worker_cooldown) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }
        debug!(task = name, "loop stopped");
    }

    /// Sequential delivery worker. One message in flight at a time.
    async fn run_worker(self, mut shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            let popped = tokio::select! {
                res = self.cache.queue_pop_timeout(PENDING_QUEUE, self.settings.pop_timeout) => res?,
                _ = shutdown.changed() => return Ok(()),
            };
            // Pop timeout is a normal idle outcome.
            let Some(raw) = popped else { continue };
            self.process_one(raw).await?;
        }
    }

    async fn process_one(&self, raw: String) -> Result<(), QueueError> {
        let message: QueuedMessage = match serde_json::from_str(&raw) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping unparseable pending-queue entry");
                return Ok(());
            }
        };

        self.cache
            .queue_push(PROCESSING_QUEUE, raw.clone())
            .await?;

        let outcome = self.delivery.deliver(&message).await;
        self.cache.queue_remove(PROCESSING_QUEUE, &raw).await?;

        match outcome {
            Ok(()) => {
                debug!(message_id = %message.id, "message delivered");
                Ok(())
            }
            Err(e) => {
                debug!(message_id = %message.id, attempts = message.attempts, error = %e, "delivery failed");
                self.handle_failed_message(message).await
            }
        }
    }

    /// Route a failed delivery: archive after `max_retries` failed attempts,
    /// otherwise schedule a retry with exponential backoff.
    async fn handle_failed_message(&self, mut message: QueuedMessage) -> Result<(), QueueError> {
        if message.attempts >= self.settings.max_retries {
            message.next_retry = None;
            let raw = serde_json::to_string(&message)?;
            self.cache.queue_push(FAILED_QUEUE, raw).await?;
            warn!(
                message_id = %message.id,
                session_id = %message.session_id,
                attempts = message.attempts,
                "retries exhausted, message archived to failed queue"
            );
            return Ok(());
        }

        message.attempts += 1;
        let delay = backoff_delay(self.settings.retry_delay, message.attempts);
        let next_retry = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        message.next_retry = Some(next_retry);

        let raw = serde_json::to_string(&message)?;
        self.cache
            .scored_insert(DELAYED_SET, next_retry.timestamp_millis() as f64, raw)
            .await?;
        debug!(
            message_id = %message.id,
            attempts = message.attempts,
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );
        Ok(())
    }

    /// Moves due delayed messages back to `pending`.
    async fn run_scheduler(self, mut shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        let mut ticker = tokio::time::interval(self.settings.scheduler_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => return Ok(()),
            }
            if *shutdown.borrow() {
                return Ok(());
            }
            let now_ms = Utc::now().timestamp_millis() as f64;
            for raw in self.cache.scored_take(DELAYED_SET, now_ms).await? {
                self.cache.queue_push(PENDING_QUEUE, raw).await?;
            }
        }
    }
}

/// Backoff for the nth failed attempt: `retry_delay * 2^(attempts-1)`.
fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    base * 2u32.saturating_pow(attempts.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(4000));
    }

    #[test]
    fn queued_message_serde_roundtrip() {
        let message = QueuedMessage {
            id: "msg_1".into(),
            session_id: "session_1".into(),
            payload: serde_json::json!({"content": "hello"}),
            attempts: 2,
            created_at: Utc::now(),
            next_retry: Some(Utc::now()),
        };
        let raw = serde_json::to_string(&message).unwrap();
        let back: QueuedMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.id, "msg_1");
        assert_eq!(back.attempts, 2);
        assert!(back.next_retry.is_some());
    }
}
