//! Session analytics.
//!
//! Derives rolling per-session metrics from the lifecycle and message events
//! the session manager and gateway already produce. Analytics is telemetry:
//! every dependency failure here is logged and swallowed so the primary flow
//! is never blocked. Records are cache-resident with a TTL; a periodic batch
//! job rolls completed sessions up into an aggregate.

mod events;
mod service;

pub use events::{SenderKind, SessionTrackedEvent};
pub use service::{
    AggregateReport, EngagementMetrics, QualityMetrics, ResolutionMetrics, SessionAnalytics,
    SessionAnalyticsService,
};
