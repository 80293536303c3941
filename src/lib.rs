//! Ticketdrill - real-time backend for IT-support training sessions.
//!
//! Trainees work simulated support tickets over a chat connection. This crate
//! covers the hot path of that experience:
//!
//! - [`session`] — authoritative session lifecycle backed by a volatile cache
//!   plus a durable repository.
//! - [`analytics`] — rolling per-session metrics derived from the same
//!   lifecycle and message events.
//! - [`gateway`] — WebSocket chat gateway: auth, room membership, fan-out.
//! - [`queue`] — durable retry queue with bounded retries and backoff.
//! - [`monitor`] — per-message latency recording and percentile alerting.
//!
//! The cache ([`cache::CacheStore`]) is the source of truth for fine-grained
//! session state between lifecycle transitions; the repository
//! ([`store::SessionRepository`]) mirrors state at coarse transitions only.

pub mod analytics;
pub mod auth;
pub mod cache;
pub mod chat;
pub mod config;
pub mod gateway;
pub mod monitor;
pub mod queue;
pub mod server;
pub mod session;
pub mod store;
