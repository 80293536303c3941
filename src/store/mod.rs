//! Durable session storage.
//!
//! The repository is the durable backstop behind the cache: it records coarse
//! lifecycle transitions (create/start/pause/complete) and survives cache
//! loss. Fine-grained session state lives in the cache only.

mod error;
mod memory;
mod session;

pub use error::{StorageError, StorageResult};
pub use memory::MemorySessionRepository;
pub use session::{
    ResolutionData, SessionRecord, SessionRepository, SessionStatus, SessionUpdate,
};
