//! Session state manager.
//!
//! Owns the authoritative [`SessionContext`], drives the lifecycle state
//! machine, and keeps the cache and repository in sync. Mutations follow
//! load -> validate -> mutate -> cache-store (TTL refresh) -> conditional
//! repository write.
//!
//! Concurrency note: two concurrent mutations of the same session perform
//! independent load/store cycles against the shared cache record; the later
//! full-record store wins. There is no optimistic concurrency control on the
//! cached context.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::analytics::{SenderKind, SessionAnalyticsService, SessionTrackedEvent};
use crate::cache::{CacheError, CacheStore};
use crate::store::{
    ResolutionData, SessionRecord, SessionRepository, SessionStatus, SessionUpdate,
};

use super::context::{
    CompleteSessionOutcome, SessionContext, VerificationUpdate, STEP_ACTIVE_SUPPORT,
    STEP_COMPLETED, STEP_INITIAL_CONTACT,
};
use super::error::SessionError;

/// Prefix for generated session ids.
const SESSION_ID_PREFIX: &str = "session_";

/// Cap on the per-context rolling response-time list.
const RESPONSE_TIME_CAP: usize = 100;

/// Process-local index entry for an active session.
#[derive(Debug, Clone)]
struct ActiveSession {
    user_id: String,
    scenario_id: String,
}

/// Manages session lifecycle and cache/repository synchronization.
///
/// Cheap to clone; clones share the same registry and backends.
#[derive(Clone)]
pub struct SessionManager {
    cache: Arc<dyn CacheStore>,
    repository: Arc<dyn SessionRepository>,
    analytics: SessionAnalyticsService,
    /// Sessions created or resumed by this process. Not cluster-wide.
    active: Arc<DashMap<String, ActiveSession>>,
    context_ttl: Duration,
}

impl SessionManager {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        repository: Arc<dyn SessionRepository>,
        analytics: SessionAnalyticsService,
        context_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            repository,
            analytics,
            active: Arc::new(DashMap::new()),
            context_ttl,
        }
    }

    fn cache_key(session_id: &str) -> String {
        format!("session:{}", session_id)
    }

    // ------------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------------

    /// Create a session for a (user, scenario) pair.
    ///
    /// Fails `Conflict` while a non-terminal session exists for the pair.
    /// The check goes through the repository, not the cache, so it survives
    /// cache loss. The durable record is written before the context is cached.
    pub async fn create_session(
        &self,
        user_id: &str,
        scenario_id: &str,
        ticket_id: Option<String>,
        customer_persona: &str,
    ) -> Result<SessionContext, SessionError> {
        if user_id.is_empty() {
            return Err(SessionError::Validation("user id is required".into()));
        }
        if scenario_id.is_empty() {
            return Err(SessionError::Validation("scenario id is required".into()));
        }

        if let Some(existing) = self
            .repository
            .find_active_by_user_and_scenario(user_id, scenario_id)
            .await?
        {
            return Err(SessionError::Conflict(format!(
                "active session {} already exists for this scenario",
                existing.id
            )));
        }

        let session_id = format!("{}{}", SESSION_ID_PREFIX, Ulid::new());
        let context = SessionContext::new(
            session_id.clone(),
            user_id.to_string(),
            scenario_id.to_string(),
            ticket_id.clone(),
            customer_persona.to_string(),
        );

        let now = Utc::now();
        self.repository
            .create(SessionRecord {
                id: session_id.clone(),
                user_id: user_id.to_string(),
                scenario_id: scenario_id.to_string(),
                ticket_id,
                status: SessionStatus::Created,
                created_at: now,
                updated_at: now,
                completed_at: None,
                resolution: None,
                metadata: HashMap::new(),
            })
            .await?;

        self.store_context(&context).await?;
        self.active.insert(
            session_id.clone(),
            ActiveSession {
                user_id: user_id.to_string(),
                scenario_id: scenario_id.to_string(),
            },
        );

        self.analytics.track_session_start(&context).await;

        info!(session_id = %session_id, user_id, scenario_id, "session created");
        Ok(context)
    }

    /// Move a session into active support.
    pub async fn start_session(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<SessionContext, SessionError> {
        let mut context = self.load_required(session_id).await?;
        self.check_ownership(&context, user_id)?;
        if context.is_completed() {
            return Err(SessionError::Validation(
                "session has already been completed".into(),
            ));
        }

        let progress = &mut context.resolution_progress;
        if progress.current_step == STEP_INITIAL_CONTACT {
            progress.completed_steps.push(STEP_INITIAL_CONTACT.to_string());
        }
        progress.current_step = STEP_ACTIVE_SUPPORT.to_string();
        context.performance_metrics.last_activity = Utc::now();

        self.store_context(&context).await?;
        self.repository
            .update(
                session_id,
                SessionUpdate {
                    status: Some(SessionStatus::Active),
                    ..Default::default()
                },
            )
            .await?;
        self.active.insert(
            session_id.to_string(),
            ActiveSession {
                user_id: context.user_id.clone(),
                scenario_id: context.scenario_id.clone(),
            },
        );

        debug!(session_id, "session started");
        Ok(context)
    }

    /// Pause an active session, recording the reason in metadata.
    pub async fn pause_session(
        &self,
        session_id: &str,
        user_id: &str,
        reason: &str,
    ) -> Result<SessionContext, SessionError> {
        let mut context = self.load_required(session_id).await?;
        self.check_ownership(&context, user_id)?;
        if context.is_completed() {
            return Err(SessionError::Validation(
                "session has already been completed".into(),
            ));
        }
        // Only an active session can pause; created sessions have nothing
        // in flight yet.
        if context.resolution_progress.current_step == STEP_INITIAL_CONTACT {
            return Err(SessionError::Validation(
                "session has not been started".into(),
            ));
        }

        context.metadata.insert(
            "pause_reason".to_string(),
            serde_json::Value::String(reason.to_string()),
        );
        context.performance_metrics.last_activity = Utc::now();

        self.store_context(&context).await?;
        self.repository
            .update(
                session_id,
                SessionUpdate {
                    status: Some(SessionStatus::Paused),
                    ..Default::default()
                },
            )
            .await?;

        self.analytics
            .track_session_event(SessionTrackedEvent::Paused {
                session_id: session_id.to_string(),
            })
            .await;

        debug!(session_id, reason, "session paused");
        Ok(context)
    }

    /// Close out a session with its resolution outcome.
    ///
    /// The durable status is `escalated` when the outcome says so, otherwise
    /// `completed`; the durable update always carries `completed_at` and the
    /// resolution payload.
    pub async fn complete_session(
        &self,
        session_id: &str,
        user_id: &str,
        outcome: CompleteSessionOutcome,
    ) -> Result<SessionContext, SessionError> {
        let mut context = self.load_required(session_id).await?;
        self.check_ownership(&context, user_id)?;
        if context.is_completed() {
            return Err(SessionError::Validation(
                "session has already been completed".into(),
            ));
        }

        let now = Utc::now();
        context.verification_status.resolution_provided = true;
        context.metadata.insert(
            "customer_satisfied".to_string(),
            serde_json::Value::Bool(outcome.customer_satisfied),
        );
        let progress = &mut context.resolution_progress;
        if progress.current_step == STEP_ACTIVE_SUPPORT {
            progress.completed_steps.push(STEP_ACTIVE_SUPPORT.to_string());
        }
        progress.current_step = STEP_COMPLETED.to_string();
        progress.next_steps.clear();
        progress.estimated_time_remaining = 0;
        if let Some(notes) = &outcome.notes {
            for note in notes {
                context.notes.push(format_note(note));
            }
        }
        context.performance_metrics.last_activity = now;

        let status = if outcome.escalated {
            SessionStatus::Escalated
        } else {
            SessionStatus::Completed
        };

        self.store_context(&context).await?;
        self.repository
            .update(
                session_id,
                SessionUpdate {
                    status: Some(status),
                    completed_at: Some(now),
                    resolution: Some(ResolutionData {
                        resolution: outcome.resolution.clone(),
                        customer_satisfied: outcome.customer_satisfied,
                        escalated: outcome.escalated,
                    }),
                    ..Default::default()
                },
            )
            .await?;
        self.active.remove(session_id);

        self.analytics
            .track_session_event(SessionTrackedEvent::Completed {
                session_id: session_id.to_string(),
                customer_satisfied: outcome.customer_satisfied,
            })
            .await;

        info!(session_id, status = %status, "session completed");
        Ok(context)
    }

    // ------------------------------------------------------------------------
    // Fine-grained mutations
    // ------------------------------------------------------------------------

    /// Merge verification flags. Only boolean flags are touched, and flags
    /// never revert once set.
    pub async fn update_verification_status(
        &self,
        session_id: &str,
        user_id: &str,
        update: VerificationUpdate,
    ) -> Result<SessionContext, SessionError> {
        let mut context = self.load_required(session_id).await?;
        self.check_ownership(&context, user_id)?;
        if update.is_empty() {
            return Err(SessionError::Validation(
                "at least one verification flag is required".into(),
            ));
        }

        context.verification_status.merge(&update);
        context.performance_metrics.last_activity = Utc::now();
        self.store_context(&context).await?;

        self.analytics
            .track_session_event(SessionTrackedEvent::VerificationUpdated {
                session_id: session_id.to_string(),
                update,
            })
            .await;

        Ok(context)
    }

    /// Append a timestamped note: `"[<ISO-8601>] <text>"`.
    pub async fn add_note(
        &self,
        session_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<SessionContext, SessionError> {
        if text.is_empty() {
            return Err(SessionError::Validation("note text is required".into()));
        }
        let mut context = self.load_required(session_id).await?;
        self.check_ownership(&context, user_id)?;

        context.notes.push(format_note(text));
        context.performance_metrics.last_activity = Utc::now();
        self.store_context(&context).await?;

        Ok(context)
    }

    /// Record trainee activity. Silently no-ops when the session is absent;
    /// never returns an error.
    pub async fn heartbeat(&self, session_id: &str, _user_id: &str) {
        let mut context = match self.load_context(session_id).await {
            Ok(Some(ctx)) => ctx,
            Ok(None) => return,
            Err(e) => {
                debug!(session_id, error = %e, "heartbeat skipped, cache unavailable");
                return;
            }
        };
        context.performance_metrics.last_activity = Utc::now();
        if let Err(e) = self.store_context(&context).await {
            debug!(session_id, error = %e, "heartbeat store failed");
        }
    }

    /// Count a chat message against the hot context and the analytics
    /// record. Tolerant of a missing session; never returns an error.
    pub async fn record_message(
        &self,
        session_id: &str,
        response_time_ms: u64,
        sender: SenderKind,
    ) {
        self.analytics
            .track_message(session_id, response_time_ms, sender, None)
            .await;

        let mut context = match self.load_context(session_id).await {
            Ok(Some(ctx)) => ctx,
            Ok(None) => return,
            Err(e) => {
                debug!(session_id, error = %e, "message not recorded, cache unavailable");
                return;
            }
        };
        let metrics = &mut context.performance_metrics;
        metrics.message_count += 1;
        metrics.response_time_ms.push(response_time_ms);
        if metrics.response_time_ms.len() > RESPONSE_TIME_CAP {
            let overflow = metrics.response_time_ms.len() - RESPONSE_TIME_CAP;
            metrics.response_time_ms.drain(..overflow);
        }
        metrics.last_activity = Utc::now();
        if let Err(e) = self.store_context(&context).await {
            warn!(session_id, error = %e, "message metrics store failed");
        }
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Fetch the hot context. Degrades to `None` on miss or cache failure,
    /// never errors.
    pub async fn get_session_context(&self, session_id: &str) -> Option<SessionContext> {
        match self.load_context(session_id).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(session_id, error = %e, "context read degraded to None");
                None
            }
        }
    }

    /// Number of sessions this process considers active. Not cluster-wide.
    pub fn get_active_session_count(&self) -> usize {
        self.active.len()
    }

    /// Session ids this process considers active for a user.
    pub fn get_active_sessions_by_user(&self, user_id: &str) -> Vec<String> {
        self.active
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn check_ownership(
        &self,
        context: &SessionContext,
        user_id: &str,
    ) -> Result<(), SessionError> {
        if context.user_id != user_id {
            return Err(SessionError::Unauthorized);
        }
        Ok(())
    }

    async fn load_required(&self, session_id: &str) -> Result<SessionContext, SessionError> {
        self.load_context(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    async fn load_context(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionContext>, SessionError> {
        let key = Self::cache_key(session_id);
        let Some(raw) = self.cache.get(&key).await? else {
            return Ok(None);
        };
        let context = serde_json::from_str(&raw).map_err(|e| CacheError::Corrupt {
            key,
            message: e.to_string(),
        })?;
        Ok(Some(context))
    }

    async fn store_context(&self, context: &SessionContext) -> Result<(), SessionError> {
        let raw = serde_json::to_string(context).map_err(|e| CacheError::Corrupt {
            key: Self::cache_key(&context.session_id),
            message: e.to_string(),
        })?;
        self.cache
            .set(
                &Self::cache_key(&context.session_id),
                raw,
                Some(self.context_ttl),
            )
            .await?;
        Ok(())
    }
}

fn format_note(text: &str) -> String {
    format!("[{}] {}", Utc::now().to_rfc3339(), text)
}
