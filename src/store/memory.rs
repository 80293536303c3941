//! In-memory repository implementation.
//!
//! Used by tests and single-node deployments. The trait seam keeps services
//! independent of the relational store's internals.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use super::error::{StorageError, StorageResult};
use super::session::{SessionRecord, SessionRepository, SessionUpdate};

/// Repository backed by a process-local map.
#[derive(Default)]
pub struct MemorySessionRepository {
    // std RwLock: never held across an await point.
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records (test helper).
    pub fn len(&self) -> usize {
        self.records.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn create(&self, record: SessionRecord) -> StorageResult<()> {
        let mut records = self.records.write().expect("lock poisoned");
        if records.contains_key(&record.id) {
            return Err(StorageError::duplicate("session", record.id));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update(&self, id: &str, update: SessionUpdate) -> StorageResult<SessionRecord> {
        let mut records = self.records.write().expect("lock poisoned");
        let record = records
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found("session", id))?;

        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(completed_at) = update.completed_at {
            record.completed_at = Some(completed_at);
        }
        if let Some(resolution) = update.resolution {
            record.resolution = Some(resolution);
        }
        if let Some(metadata) = update.metadata {
            record.metadata.extend(metadata);
        }
        record.updated_at = Utc::now();

        Ok(record.clone())
    }

    async fn find_by_id(&self, id: &str) -> StorageResult<Option<SessionRecord>> {
        let records = self.records.read().expect("lock poisoned");
        Ok(records.get(id).cloned())
    }

    async fn find_active_by_user_and_scenario(
        &self,
        user_id: &str,
        scenario_id: &str,
    ) -> StorageResult<Option<SessionRecord>> {
        let records = self.records.read().expect("lock poisoned");
        Ok(records
            .values()
            .find(|r| {
                r.user_id == user_id && r.scenario_id == scenario_id && !r.status.is_terminal()
            })
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionStatus;

    fn record(id: &str, user: &str, scenario: &str) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            user_id: user.to_string(),
            scenario_id: scenario.to_string(),
            ticket_id: None,
            status: SessionStatus::Created,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
            resolution: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn create_and_find() {
        let repo = MemorySessionRepository::new();
        repo.create(record("s1", "u1", "sc1")).await.unwrap();

        let found = repo.find_by_id("s1").await.unwrap().unwrap();
        assert_eq!(found.user_id, "u1");
        assert!(repo.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_create_rejected() {
        let repo = MemorySessionRepository::new();
        repo.create(record("s1", "u1", "sc1")).await.unwrap();
        let err = repo.create(record("s1", "u1", "sc1")).await.unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn active_lookup_skips_terminal_sessions() {
        let repo = MemorySessionRepository::new();
        repo.create(record("s1", "u1", "sc1")).await.unwrap();

        assert!(repo
            .find_active_by_user_and_scenario("u1", "sc1")
            .await
            .unwrap()
            .is_some());

        repo.update(
            "s1",
            SessionUpdate {
                status: Some(SessionStatus::Completed),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(repo
            .find_active_by_user_and_scenario("u1", "sc1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_bumps_updated_at_and_merges_metadata() {
        let repo = MemorySessionRepository::new();
        repo.create(record("s1", "u1", "sc1")).await.unwrap();

        let mut metadata = HashMap::new();
        metadata.insert("pause_reason".to_string(), serde_json::json!("lunch"));
        let updated = repo
            .update(
                "s1",
                SessionUpdate {
                    status: Some(SessionStatus::Paused),
                    metadata: Some(metadata),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, SessionStatus::Paused);
        assert_eq!(updated.metadata["pause_reason"], "lunch");
    }
}
