//! Session lifecycle management.
//!
//! A session is one practice ticket-resolution attempt by a trainee against a
//! simulated customer. The authoritative hot state ([`SessionContext`]) lives
//! in the cache; the durable repository mirrors it at coarse lifecycle
//! transitions only.
//!
//! State machine:
//!
//! ```text
//! created -> active -> paused -> active -> { completed | escalated }
//! ```
//!
//! All mutations flow through [`SessionManager`], which enforces ownership
//! and the load -> validate -> mutate -> cache-store -> repository order.

mod context;
mod error;
mod manager;

pub use context::{
    CompleteSessionOutcome, PerformanceMetrics, QualityScores, ResolutionProgress, SessionContext,
    VerificationStatus, VerificationUpdate, STEP_ACTIVE_SUPPORT, STEP_COMPLETED,
    STEP_INITIAL_CONTACT,
};
pub use error::SessionError;
pub use manager::SessionManager;
