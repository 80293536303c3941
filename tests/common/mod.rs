//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ticketdrill::analytics::SessionAnalyticsService;
use ticketdrill::cache::{CacheStore, MemoryCacheStore};
use ticketdrill::config::Config;
use ticketdrill::queue::{DeliveryError, DeliveryHandler, QueueSettings, QueuedMessage};
use ticketdrill::server::{build_services, AppState};
use ticketdrill::session::SessionManager;
use ticketdrill::store::MemorySessionRepository;

/// A fully wired application state on fresh in-memory backends.
pub fn test_state() -> AppState {
    build_services(&Config::default())
}

/// A session manager plus handles to its backends for direct assertions.
pub fn session_stack() -> (
    SessionManager,
    Arc<MemorySessionRepository>,
    Arc<dyn CacheStore>,
) {
    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
    let repository = Arc::new(MemorySessionRepository::new());
    let analytics = SessionAnalyticsService::new(
        cache.clone(),
        Duration::from_secs(3600),
        50,
        Duration::from_secs(24 * 3600),
    );
    let manager = SessionManager::new(
        cache.clone(),
        repository.clone(),
        analytics,
        Duration::from_secs(3600),
    );
    (manager, repository, cache)
}

/// Queue settings with delays compressed for real-time tests.
pub fn fast_queue_settings() -> QueueSettings {
    QueueSettings {
        max_retries: 3,
        retry_delay: Duration::from_millis(40),
        pop_timeout: Duration::from_millis(20),
        worker_cooldown: Duration::from_millis(20),
        scheduler_interval: Duration::from_millis(5),
    }
}

/// Delivery simulator that always fails, recording each attempt's timestamp
/// and the message's attempt counter at the time.
#[derive(Default)]
pub struct FailingDelivery {
    pub attempts: Mutex<Vec<(u32, DateTime<Utc>)>>,
}

#[async_trait]
impl DeliveryHandler for FailingDelivery {
    async fn deliver(&self, message: &QueuedMessage) -> Result<(), DeliveryError> {
        self.attempts
            .lock()
            .unwrap()
            .push((message.attempts, Utc::now()));
        Err(DeliveryError("simulated failure".into()))
    }
}

impl FailingDelivery {
    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

/// Delivery simulator that fails a fixed number of times, then succeeds.
pub struct FlakyDelivery {
    failures_remaining: AtomicU32,
    pub delivered: Mutex<Vec<QueuedMessage>>,
}

impl FlakyDelivery {
    pub fn new(failures: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
            delivered: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DeliveryHandler for FlakyDelivery {
    async fn deliver(&self, message: &QueuedMessage) -> Result<(), DeliveryError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(DeliveryError("simulated transient failure".into()));
        }
        self.delivered.lock().unwrap().push(message.clone());
        Ok(())
    }
}
