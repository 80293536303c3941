//! Message latency recording, percentile metrics, and high-latency alerting.
//!
//! Monitoring is telemetry: every dependency failure here is logged and
//! swallowed so the primary message flow is never blocked by metrics.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStore;

const SAMPLES_SET: &str = "latency:samples";
const SESSION_KEY_PREFIX: &str = "latency:session:";

fn session_key(session_id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{session_id}")
}

/// One observed message delivery, kept in the global time-scored set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySample {
    pub message_id: String,
    pub session_id: String,
    pub sent_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    /// `received_at - sent_at`, clamped at zero, in milliseconds.
    pub latency: u64,
    pub message_size: u64,
}

/// Per-session counters plus a bounded rolling window of raw latencies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionAggregate {
    message_count: u64,
    total_latency: u64,
    total_bytes: u64,
    first_sample_at: Option<DateTime<Utc>>,
    last_sample_at: Option<DateTime<Utc>>,
    latencies: Vec<u64>,
}

impl SessionAggregate {
    fn absorb(&mut self, sample: &LatencySample, window: usize) {
        self.message_count += 1;
        self.total_latency += sample.latency;
        self.total_bytes += sample.message_size;
        if self.first_sample_at.is_none() {
            self.first_sample_at = Some(sample.received_at);
        }
        self.last_sample_at = Some(sample.received_at);
        self.latencies.push(sample.latency);
        if self.latencies.len() > window {
            let excess = self.latencies.len() - window;
            self.latencies.drain(..excess);
        }
    }

    fn metrics(&self) -> LatencyMetrics {
        let average = if self.message_count == 0 {
            0.0
        } else {
            self.total_latency as f64 / self.message_count as f64
        };
        let messages_per_second = match (self.first_sample_at, self.last_sample_at) {
            (Some(first), Some(last)) => {
                let elapsed = (last - first).num_milliseconds().max(0) as f64 / 1000.0;
                if elapsed > 0.0 {
                    self.message_count as f64 / elapsed
                } else {
                    self.message_count as f64
                }
            }
            _ => 0.0,
        };
        let mut sorted = self.latencies.clone();
        sorted.sort_unstable();
        LatencyMetrics {
            average_latency: average,
            p95_latency: nearest_rank(&sorted, 0.95),
            p99_latency: nearest_rank(&sorted, 0.99),
            message_count: self.message_count,
            total_bytes: self.total_bytes,
            messages_per_second,
        }
    }
}

/// Derived latency metrics for one session, or the whole process.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyMetrics {
    pub average_latency: f64,
    pub p95_latency: u64,
    pub p99_latency: u64,
    pub message_count: u64,
    pub total_bytes: u64,
    pub messages_per_second: f64,
}

/// Timing and threshold knobs.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    /// Samples older than this are pruned from the global set.
    pub retention: Duration,
    /// Latency above this raises an alert.
    pub alert_threshold: Duration,
    /// How often the alert scan runs.
    pub alert_interval: Duration,
    /// How often the retention prune runs.
    pub prune_interval: Duration,
    /// Cap on the per-session rolling latency list.
    pub rolling_window: usize,
    /// TTL applied to per-session aggregates.
    pub session_ttl: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 3600),
            alert_threshold: Duration::from_secs(5),
            alert_interval: Duration::from_secs(60),
            prune_interval: Duration::from_secs(3600),
            rolling_window: 1000,
            session_ttl: Duration::from_secs(3600),
        }
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
///
/// `index = floor(n * p)`, clamped to the last element. Empty input is zero.
fn nearest_rank(sorted: &[u64], percentile: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = ((sorted.len() as f64 * percentile).floor() as usize).min(sorted.len() - 1);
    sorted[index]
}

/// Records per-message latency and exposes percentile metrics and alerts.
#[derive(Clone)]
pub struct PerformanceMonitor {
    cache: Arc<dyn CacheStore>,
    settings: MonitorSettings,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl PerformanceMonitor {
    pub fn new(cache: Arc<dyn CacheStore>, settings: MonitorSettings) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            cache,
            settings,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    // ------------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------------

    /// Record one message delivery. Never fails; telemetry errors are logged.
    pub async fn record_message_latency(
        &self,
        message_id: &str,
        session_id: &str,
        sent_at: DateTime<Utc>,
        received_at: DateTime<Utc>,
        message_size: u64,
    ) {
        let latency = (received_at - sent_at).num_milliseconds().max(0) as u64;
        let sample = LatencySample {
            message_id: message_id.to_string(),
            session_id: session_id.to_string(),
            sent_at,
            received_at,
            latency,
            message_size,
        };

        let raw = match serde_json::to_string(&sample) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(message_id, error = %e, "failed to encode latency sample");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .scored_insert(SAMPLES_SET, received_at.timestamp_millis() as f64, raw)
            .await
        {
            warn!(message_id, error = %e, "failed to record latency sample");
            return;
        }

        let window = self.settings.rolling_window;
        let sample_for_update = sample.clone();
        let updated = self
            .cache
            .mutate(
                &session_key(session_id),
                Some(self.settings.session_ttl),
                Box::new(move |prev| {
                    let mut aggregate = prev
                        .and_then(|raw| serde_json::from_str::<SessionAggregate>(&raw).ok())
                        .unwrap_or_default();
                    aggregate.absorb(&sample_for_update, window);
                    serde_json::to_string(&aggregate).ok()
                }),
            )
            .await;
        if let Err(e) = updated {
            warn!(session_id, error = %e, "failed to update session latency aggregate");
        }

        self.prune_expired_samples().await;
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Derived metrics for one session. Unknown sessions read as all-zero.
    pub async fn get_session_metrics(&self, session_id: &str) -> LatencyMetrics {
        match self.load_aggregate(session_id).await {
            Some(aggregate) => aggregate.metrics(),
            None => LatencyMetrics::default(),
        }
    }

    /// Metrics folded across every live per-session aggregate.
    pub async fn get_global_metrics(&self) -> LatencyMetrics {
        let keys = match self.cache.scan_prefix(SESSION_KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "failed to scan session aggregates");
                return LatencyMetrics::default();
            }
        };

        let mut folded = SessionAggregate::default();
        for key in keys {
            let raw = match self.cache.get(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key, error = %e, "failed to read session aggregate");
                    continue;
                }
            };
            let Ok(aggregate) = serde_json::from_str::<SessionAggregate>(&raw) else {
                warn!(key, "skipping unparseable session aggregate");
                continue;
            };
            folded.message_count += aggregate.message_count;
            folded.total_latency += aggregate.total_latency;
            folded.total_bytes += aggregate.total_bytes;
            folded.first_sample_at = match (folded.first_sample_at, aggregate.first_sample_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            folded.last_sample_at = match (folded.last_sample_at, aggregate.last_sample_at) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            folded.latencies.extend(aggregate.latencies);
        }
        folded.metrics()
    }

    /// Samples from the global set, optionally filtered by session and range.
    pub async fn get_latency_history(
        &self,
        session_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<LatencySample> {
        let min = start.map_or(f64::MIN, |t| t.timestamp_millis() as f64);
        let max = end.map_or(f64::MAX, |t| t.timestamp_millis() as f64);
        let raws = match self.cache.scored_range(SAMPLES_SET, min, max).await {
            Ok(raws) => raws,
            Err(e) => {
                warn!(error = %e, "failed to read latency history");
                return Vec::new();
            }
        };
        raws.iter()
            .filter_map(|raw| serde_json::from_str::<LatencySample>(raw).ok())
            .filter(|s| session_id.is_none_or(|id| s.session_id == id))
            .collect()
    }

    /// Samples above the threshold, slowest first.
    pub async fn get_slow_messages(&self, threshold: Duration) -> Vec<LatencySample> {
        let threshold_ms = threshold.as_millis() as u64;
        let mut slow: Vec<LatencySample> = self
            .get_latency_history(None, None, None)
            .await
            .into_iter()
            .filter(|s| s.latency > threshold_ms)
            .collect();
        slow.sort_by(|a, b| b.latency.cmp(&a.latency));
        slow
    }

    /// Scan the last minute for breaches and log them. Returns the breaches
    /// so callers can hook their own alert sinks.
    pub async fn alert_on_high_latency(&self, threshold: Duration) -> Vec<LatencySample> {
        let window_start = Utc::now() - chrono::Duration::seconds(60);
        let threshold_ms = threshold.as_millis() as u64;
        let breaches: Vec<LatencySample> = self
            .get_latency_history(None, Some(window_start), None)
            .await
            .into_iter()
            .filter(|s| s.latency > threshold_ms)
            .collect();
        if !breaches.is_empty() {
            let peak = breaches.iter().map(|s| s.latency).max().unwrap_or(0);
            warn!(
                count = breaches.len(),
                peak_latency_ms = peak,
                threshold_ms,
                "high message latency detected"
            );
        }
        breaches
    }

    // ------------------------------------------------------------------------
    // Background timers
    // ------------------------------------------------------------------------

    /// Spawn the recurring alert scan and retention prune.
    pub async fn start(&self) {
        let alert = {
            let monitor = self.clone();
            let mut shutdown = self.shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(monitor.settings.alert_interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            monitor.alert_on_high_latency(monitor.settings.alert_threshold).await;
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };
        let prune = {
            let monitor = self.clone();
            let mut shutdown = self.shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(monitor.settings.prune_interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => monitor.prune_expired_samples().await,
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };
        let mut tasks = self.tasks.lock().await;
        tasks.push(alert);
        tasks.push(prune);
        info!("performance monitor timers started");
    }

    /// Stop the timers and wait for them to finish.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send(true).is_err() {
            debug!("monitor shutdown signal had no receivers");
        }
        let handles = {
            let mut tasks = self.tasks.lock().await;
            std::mem::take(&mut *tasks)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = ?e, "monitor timer panicked during shutdown");
            }
        }
    }

    /// Drop samples older than the retention window.
    async fn prune_expired_samples(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.settings.retention).unwrap_or_default();
        match self
            .cache
            .scored_take(SAMPLES_SET, cutoff.timestamp_millis() as f64)
            .await
        {
            Ok(removed) if !removed.is_empty() => {
                debug!(removed = removed.len(), "pruned expired latency samples");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to prune latency samples"),
        }
    }

    async fn load_aggregate(&self, session_id: &str) -> Option<SessionAggregate> {
        let raw = match self.cache.get(&session_key(session_id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(session_id, error = %e, "failed to read session aggregate");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(aggregate) => Some(aggregate),
            Err(e) => {
                warn!(session_id, error = %e, "unparseable session aggregate");
                None
            }
        }
    }
}
