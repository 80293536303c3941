//! Reliable message delivery queue.
//!
//! Messages move through cache-resident queues:
//!
//! ```text
//! pending -> processing -> (removed on success)
//!                       -> delayed (backoff) -> pending
//!                       -> failed (retries exhausted, kept for replay)
//! ```
//!
//! A single sequential worker drains `pending`; retry scheduling is an
//! explicit delayed set keyed by `next_retry` and drained by a scheduler
//! loop, so no per-message timers exist. Both loops restart after a cooldown
//! when they hit an uncaught failure; they never permanently stop.

mod service;

pub use service::{
    DeliveryError, DeliveryHandler, MessageQueueService, QueueError, QueueName, QueueSettings,
    QueueStats, QueuedMessage,
};
