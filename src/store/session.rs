//! Session repository trait and durable record types.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StorageResult;

/// Coarse lifecycle state of a session, as mirrored durably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Active,
    Paused,
    Completed,
    Escalated,
}

impl SessionStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Escalated)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

/// Outcome payload recorded when a session reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionData {
    pub resolution: String,
    pub customer_satisfied: bool,
    pub escalated: bool,
}

/// Durable mirror of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub scenario_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionData>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Partial update applied to a durable record.
///
/// `update` bumps `updated_at`; all other fields apply only when set.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub completed_at: Option<DateTime<Utc>>,
    pub resolution: Option<ResolutionData>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Durable storage interface for sessions.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persist a new session record.
    async fn create(&self, record: SessionRecord) -> StorageResult<()>;

    /// Apply a partial update to an existing record.
    async fn update(&self, id: &str, update: SessionUpdate) -> StorageResult<SessionRecord>;

    /// Fetch a record by id.
    async fn find_by_id(&self, id: &str) -> StorageResult<Option<SessionRecord>>;

    /// Find the non-terminal session for a (user, scenario) pair, if any.
    ///
    /// This is the authority for the one-active-session-per-pair invariant;
    /// it must not depend on the cache, so it survives cache loss.
    async fn find_active_by_user_and_scenario(
        &self,
        user_id: &str,
        scenario_id: &str,
    ) -> StorageResult<Option<SessionRecord>>;
}
