//! Typed analytics events.
//!
//! A closed union over event kinds the tracker understands, matched
//! exhaustively so new kinds are compile-time-checked additions.

use serde::{Deserialize, Serialize};

use crate::session::VerificationUpdate;

/// Who sent a chat message, from the trainee's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    /// The trainee acting as the support operator.
    Operator,
    /// The simulated customer.
    Customer,
}

impl SenderKind {
    /// Map a wire-level sender type string onto a kind.
    pub fn from_sender_type(sender_type: &str) -> Self {
        if sender_type.eq_ignore_ascii_case("customer") {
            Self::Customer
        } else {
            Self::Operator
        }
    }
}

/// Lifecycle events consumed by the analytics tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionTrackedEvent {
    /// The session was paused.
    Paused { session_id: String },
    /// The session reached a terminal state.
    Completed {
        session_id: String,
        customer_satisfied: bool,
    },
    /// Verification flags changed.
    VerificationUpdated {
        session_id: String,
        update: VerificationUpdate,
    },
}

impl SessionTrackedEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Paused { session_id }
            | Self::Completed { session_id, .. }
            | Self::VerificationUpdated { session_id, .. } => session_id,
        }
    }
}
