//! Cache-resident session state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resolution step at session creation.
pub const STEP_INITIAL_CONTACT: &str = "initial_contact";
/// Resolution step while the trainee works the ticket.
pub const STEP_ACTIVE_SUPPORT: &str = "active_support";
/// Terminal resolution step.
pub const STEP_COMPLETED: &str = "completed";

/// Customer-verification checkpoints a trainee is expected to clear.
///
/// Flags are monotonic: once verified, a checkpoint never reverts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationStatus {
    pub identity_verified: bool,
    pub account_verified: bool,
    pub issue_confirmed: bool,
    pub resolution_provided: bool,
}

/// Partial verification update; only set flags are merged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationUpdate {
    pub identity_verified: Option<bool>,
    pub account_verified: Option<bool>,
    pub issue_confirmed: Option<bool>,
    pub resolution_provided: Option<bool>,
}

impl VerificationUpdate {
    /// True if no flag is set.
    pub fn is_empty(&self) -> bool {
        self.identity_verified.is_none()
            && self.account_verified.is_none()
            && self.issue_confirmed.is_none()
            && self.resolution_provided.is_none()
    }
}

impl VerificationStatus {
    /// Merge set flags, monotonically (true never reverts to false).
    pub fn merge(&mut self, update: &VerificationUpdate) {
        if let Some(v) = update.identity_verified {
            self.identity_verified |= v;
        }
        if let Some(v) = update.account_verified {
            self.account_verified |= v;
        }
        if let Some(v) = update.issue_confirmed {
            self.issue_confirmed |= v;
        }
        if let Some(v) = update.resolution_provided {
            self.resolution_provided |= v;
        }
    }
}

/// Progress through the scripted resolution flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionProgress {
    pub current_step: String,
    pub completed_steps: Vec<String>,
    pub next_steps: Vec<String>,
    /// Remaining time estimate in minutes.
    pub estimated_time_remaining: u32,
}

impl Default for ResolutionProgress {
    fn default() -> Self {
        Self {
            current_step: STEP_INITIAL_CONTACT.to_string(),
            completed_steps: Vec::new(),
            next_steps: vec![
                "verify_customer_identity".to_string(),
                "diagnose_issue".to_string(),
            ],
            estimated_time_remaining: 30,
        }
    }
}

/// Per-message quality scores, 0.0 to 100.0.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityScores {
    pub communication: f64,
    pub technical_accuracy: f64,
    pub empathy: f64,
    pub efficiency: f64,
}

/// Fine-grained activity counters kept in the hot context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
    pub response_time_ms: Vec<u64>,
    pub quality: QualityScores,
}

impl PerformanceMetrics {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            start_time: now,
            last_activity: now,
            message_count: 0,
            response_time_ms: Vec::new(),
            quality: QualityScores::default(),
        }
    }
}

/// The authoritative hot state of a session.
///
/// Between lifecycle transitions the cached context is the source of truth
/// for every fine-grained field; the repository mirrors only coarse state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
    pub scenario_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    pub customer_persona: String,
    pub verification_status: VerificationStatus,
    pub resolution_progress: ResolutionProgress,
    pub performance_metrics: PerformanceMetrics,
    #[serde(default)]
    pub customer_info: HashMap<String, serde_json::Value>,
    /// Entries formatted as `"[<ISO-8601>] <text>"`.
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SessionContext {
    /// Build a fresh context in the `created` state.
    pub fn new(
        session_id: String,
        user_id: String,
        scenario_id: String,
        ticket_id: Option<String>,
        customer_persona: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id,
            scenario_id,
            ticket_id,
            customer_persona,
            verification_status: VerificationStatus::default(),
            resolution_progress: ResolutionProgress::default(),
            performance_metrics: PerformanceMetrics::new(now),
            customer_info: HashMap::new(),
            notes: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Whether the session has reached a terminal step.
    pub fn is_completed(&self) -> bool {
        self.resolution_progress.current_step == STEP_COMPLETED
    }
}

/// Outcome submitted when a trainee closes out a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteSessionOutcome {
    pub resolution: String,
    pub customer_satisfied: bool,
    pub escalated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_merge_is_monotonic() {
        let mut status = VerificationStatus {
            identity_verified: true,
            ..Default::default()
        };
        status.merge(&VerificationUpdate {
            identity_verified: Some(false),
            account_verified: Some(true),
            ..Default::default()
        });
        assert!(status.identity_verified);
        assert!(status.account_verified);
        assert!(!status.issue_confirmed);
    }

    #[test]
    fn context_serde_roundtrip_uses_camel_case() {
        let ctx = SessionContext::new(
            "session_1".into(),
            "u1".into(),
            "sc1".into(),
            None,
            "impatient_manager".into(),
        );
        let json = serde_json::to_value(&ctx).unwrap();
        assert!(json.get("sessionId").is_some());
        assert!(json["verificationStatus"].get("identityVerified").is_some());
        assert_eq!(json["resolutionProgress"]["currentStep"], "initial_contact");

        let back: SessionContext = serde_json::from_value(json).unwrap();
        assert_eq!(back.session_id, "session_1");
    }
}
