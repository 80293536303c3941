//! Rolling per-session analytics tracker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::session::SessionContext;

use super::events::{SenderKind, SessionTrackedEvent};

const KEY_PREFIX: &str = "analytics:session:";
const AGGREGATE_PREFIX: &str = "analytics:aggregate:";
const AGGREGATE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Blended quality scores, 0.0 to 100.0. A zero means "not yet scored".
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub communication_score: f64,
    pub technical_score: f64,
    pub empathy_score: f64,
    pub efficiency_score: f64,
    pub overall_score: f64,
}

/// Resolution outcome counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_first_response_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_resolution_ms: Option<i64>,
    pub escalated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_satisfied: Option<bool>,
    pub resolution_steps: u32,
}

/// Engagement counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementMetrics {
    /// Operator messages per elapsed minute.
    pub user_interaction_rate: f64,
    /// Count of operator messages.
    pub session_depth: u64,
    pub pause_count: u32,
    pub total_pause_time_ms: i64,
}

/// Cache-resident analytics record for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnalytics {
    pub session_id: String,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub message_count: u64,
    /// Bounded rolling window of raw response times.
    pub response_time_ms: Vec<u64>,
    pub quality_metrics: QualityMetrics,
    pub resolution_metrics: ResolutionMetrics,
    pub engagement_metrics: EngagementMetrics,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Roll-up produced by the periodic aggregation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub generated_at: DateTime<Utc>,
    pub window_hours: u64,
    pub sessions: u64,
    pub total_messages: u64,
    pub average_duration_ms: i64,
    /// Share of completed sessions with a satisfied customer.
    pub satisfaction_rate: f64,
}

/// Tracks per-session metrics in the cache.
///
/// Cheap to clone. All tracking paths tolerate missing records and swallow
/// dependency failures; reads degrade to `None` / `{}`.
#[derive(Clone)]
pub struct SessionAnalyticsService {
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    response_time_cap: usize,
    aggregation_window: Duration,
}

impl SessionAnalyticsService {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        ttl: Duration,
        response_time_cap: usize,
        aggregation_window: Duration,
    ) -> Self {
        Self {
            cache,
            ttl,
            response_time_cap,
            aggregation_window,
        }
    }

    fn key(session_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, session_id)
    }

    // ------------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------------

    /// Seed the analytics record when a session starts.
    pub async fn track_session_start(&self, context: &SessionContext) {
        let mut metadata = HashMap::new();
        metadata.insert("scenarioId".to_string(), json!(context.scenario_id));
        metadata.insert(
            "customerPersona".to_string(),
            json!(context.customer_persona),
        );
        for field in ["urgency", "category"] {
            if let Some(value) = context.metadata.get(field) {
                metadata.insert(field.to_string(), value.clone());
            }
        }

        let record = SessionAnalytics {
            session_id: context.session_id.clone(),
            user_id: context.user_id.clone(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            message_count: 0,
            response_time_ms: Vec::new(),
            quality_metrics: QualityMetrics::default(),
            resolution_metrics: ResolutionMetrics::default(),
            engagement_metrics: EngagementMetrics::default(),
            metadata,
        };

        let raw = match serde_json::to_string(&record) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(session_id = %context.session_id, error = %e, "analytics seed encode failed");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .set(&Self::key(&context.session_id), raw, Some(self.ttl))
            .await
        {
            warn!(session_id = %context.session_id, error = %e, "analytics seed failed");
        }
    }

    /// Fold one chat message into the record. No-op when the record is
    /// missing; never fails outward.
    pub async fn track_message(
        &self,
        session_id: &str,
        response_time_ms: u64,
        sender: SenderKind,
        quality_score: Option<f64>,
    ) {
        let cap = self.response_time_cap;
        let now = Utc::now();
        let result = self
            .cache
            .mutate(
                &Self::key(session_id),
                Some(self.ttl),
                Box::new(move |prev| {
                    let mut record: SessionAnalytics = serde_json::from_str(&prev?).ok()?;

                    record.message_count += 1;
                    record.response_time_ms.push(response_time_ms);
                    if record.response_time_ms.len() > cap {
                        let overflow = record.response_time_ms.len() - cap;
                        record.response_time_ms.drain(..overflow);
                    }

                    match sender {
                        SenderKind::Operator => {
                            record.engagement_metrics.session_depth += 1;
                        }
                        SenderKind::Customer => {
                            if record.resolution_metrics.time_to_first_response_ms.is_none() {
                                record.resolution_metrics.time_to_first_response_ms = Some(
                                    (now - record.start_time).num_milliseconds().max(0),
                                );
                            }
                        }
                    }

                    if let Some(score) = quality_score.filter(|s| *s > 0.0) {
                        let quality = &mut record.quality_metrics;
                        quality.communication_score =
                            blend_score(quality.communication_score, score);
                        quality.overall_score = blend_score(quality.overall_score, score);
                    }

                    serde_json::to_string(&record).ok()
                }),
            )
            .await;

        if let Err(e) = result {
            warn!(session_id, error = %e, "message tracking skipped");
        }
    }

    /// Fold a lifecycle event into the record. Every branch tolerates a
    /// missing or partial record and never fails outward.
    pub async fn track_session_event(&self, event: SessionTrackedEvent) {
        let session_id = event.session_id().to_string();
        let now = Utc::now();
        let result = self
            .cache
            .mutate(
                &Self::key(&session_id),
                Some(self.ttl),
                Box::new(move |prev| {
                    let mut record: SessionAnalytics = serde_json::from_str(&prev?).ok()?;

                    // A pause leaves a marker; the next event settles the
                    // accumulated pause time (there is no resume event).
                    settle_pause(&mut record, now);

                    match &event {
                        SessionTrackedEvent::Paused { .. } => {
                            record.engagement_metrics.pause_count += 1;
                            record
                                .metadata
                                .insert("lastPausedAt".to_string(), json!(now.to_rfc3339()));
                        }
                        SessionTrackedEvent::Completed {
                            customer_satisfied, ..
                        } => {
                            let duration = (now - record.start_time).num_milliseconds().max(0);
                            record.end_time = Some(now);
                            record.duration_ms = Some(duration);
                            record.resolution_metrics.time_to_resolution_ms = Some(duration);
                            record.resolution_metrics.customer_satisfied =
                                Some(*customer_satisfied);
                            record
                                .metadata
                                .insert("completionStatus".to_string(), json!("completed"));
                        }
                        SessionTrackedEvent::VerificationUpdated { update, .. } => {
                            let entry = record
                                .metadata
                                .entry("verification".to_string())
                                .or_insert_with(|| json!({}));
                            if let Some(map) = entry.as_object_mut() {
                                for (field, value) in [
                                    ("identityVerified", update.identity_verified),
                                    ("accountVerified", update.account_verified),
                                    ("issueConfirmed", update.issue_confirmed),
                                    ("resolutionProvided", update.resolution_provided),
                                ] {
                                    if let Some(v) = value {
                                        map.insert(field.to_string(), json!(v));
                                    }
                                }
                            }
                            record.resolution_metrics.resolution_steps += 1;
                        }
                    }

                    serde_json::to_string(&record).ok()
                }),
            )
            .await;

        if let Err(e) = result {
            warn!(session_id, error = %e, "event tracking skipped");
        }
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Fetch the record. Cache failure maps to `None`.
    pub async fn get_session_analytics(&self, session_id: &str) -> Option<SessionAnalytics> {
        let raw = match self.cache.get(&Self::key(session_id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(session_id, error = %e, "analytics read degraded to None");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(session_id, error = %e, "corrupt analytics record ignored");
                None
            }
        }
    }

    /// Derived live snapshot. Returns an empty object, not null, when the
    /// record is absent.
    pub async fn get_realtime_metrics(&self, session_id: &str) -> serde_json::Value {
        let Some(record) = self.get_session_analytics(session_id).await else {
            return json!({});
        };

        let now = Utc::now();
        let end = record.end_time.unwrap_or(now);
        let duration_ms = (end - record.start_time).num_milliseconds().max(0);
        let elapsed_minutes = (duration_ms as f64 / 60_000.0).max(1.0 / 60.0);
        let interaction_rate = record.engagement_metrics.session_depth as f64 / elapsed_minutes;

        let recent: Vec<u64> = record
            .response_time_ms
            .iter()
            .rev()
            .take(10)
            .rev()
            .copied()
            .collect();

        json!({
            "sessionId": record.session_id,
            "durationMs": duration_ms,
            "messageCount": record.message_count,
            "responseTimeMs": recent,
            "sessionDepth": record.engagement_metrics.session_depth,
            "userInteractionRate": interaction_rate,
            "pauseCount": record.engagement_metrics.pause_count,
        })
    }

    // ------------------------------------------------------------------------
    // Batch aggregation
    // ------------------------------------------------------------------------

    /// Roll completed sessions in the window up into an [`AggregateReport`].
    ///
    /// The report is written to the cache under a dated key with a 7-day
    /// TTL, not to the repository; it shares the cache's durability.
    /// An empty window is a no-op; failures are logged, never raised.
    pub async fn aggregate_session_data(&self) -> Option<AggregateReport> {
        let keys = match self.cache.scan_prefix(KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "aggregation scan failed");
                return None;
            }
        };

        let now = Utc::now();
        let window = chrono::Duration::from_std(self.aggregation_window).ok()?;
        let cutoff = now - window;

        let mut sessions = 0u64;
        let mut total_messages = 0u64;
        let mut total_duration_ms = 0i64;
        let mut satisfied = 0u64;

        for key in keys {
            let Ok(Some(raw)) = self.cache.get(&key).await else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<SessionAnalytics>(&raw) else {
                continue;
            };
            let Some(end_time) = record.end_time else {
                continue;
            };
            if end_time < cutoff {
                continue;
            }
            sessions += 1;
            total_messages += record.message_count;
            total_duration_ms += record.duration_ms.unwrap_or(0);
            if record.resolution_metrics.customer_satisfied == Some(true) {
                satisfied += 1;
            }
        }

        if sessions == 0 {
            debug!("aggregation window empty, nothing to roll up");
            return None;
        }

        let report = AggregateReport {
            generated_at: now,
            window_hours: self.aggregation_window.as_secs() / 3600,
            sessions,
            total_messages,
            average_duration_ms: total_duration_ms / sessions as i64,
            satisfaction_rate: satisfied as f64 / sessions as f64,
        };

        let key = format!("{}{}", AGGREGATE_PREFIX, now.format("%Y-%m-%d"));
        match serde_json::to_string(&report) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(&key, raw, Some(AGGREGATE_TTL)).await {
                    warn!(error = %e, "aggregate store failed");
                }
            }
            Err(e) => warn!(error = %e, "aggregate encode failed"),
        }

        info!(sessions, total_messages, "session data aggregated");
        Some(report)
    }

    /// Release the cache connection. Idempotent.
    pub async fn cleanup(&self) {
        if let Err(e) = self.cache.close().await {
            debug!(error = %e, "analytics cleanup: cache already closed");
        }
    }
}

/// Blend a new quality score into an existing one without regressing a
/// positive score to zero. Exact weighting is an implementation detail.
fn blend_score(current: f64, incoming: f64) -> f64 {
    if current > 0.0 {
        (current + incoming) / 2.0
    } else {
        incoming
    }
}

/// Settle the open pause marker, if any, into `total_pause_time_ms`.
fn settle_pause(record: &mut SessionAnalytics, now: DateTime<Utc>) {
    let Some(marker) = record.metadata.remove("lastPausedAt") else {
        return;
    };
    let Some(paused_at) = marker
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    else {
        return;
    };
    let pause_ms = (now - paused_at.with_timezone(&Utc))
        .num_milliseconds()
        .max(0);
    record.engagement_metrics.total_pause_time_ms += pause_ms;
}
