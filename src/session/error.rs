//! Session error types and surfacing policy.

use thiserror::Error;

use crate::cache::CacheError;
use crate::store::StorageError;

/// Errors surfaced by [`super::SessionManager`].
///
/// Policy: validation, ownership, and conflict failures always surface;
/// dependency failures propagate from mutations but degrade to `None`/no-op
/// on read and heartbeat paths.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A required field is missing or malformed. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The session does not exist (mutating paths only).
    #[error("session not found: {0}")]
    NotFound(String),

    /// The caller does not own the session.
    #[error("user does not own this session")]
    Unauthorized,

    /// An active session already exists for this (user, scenario) pair.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The cache is unavailable or holds a corrupt entry.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The durable repository failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
