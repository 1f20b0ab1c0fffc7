//! Error types for the conversation crate.
//!
//! Transcript errors signal misuse of the store by the orchestrator itself.
//! Nothing here reaches the presentation layer: remote failures are turned
//! into chat messages instead.

use parley_core::TurnId;
use std::fmt;

/// Errors from transcript mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptError {
    /// No turn with this id exists.
    TurnNotFound { id: TurnId },
    /// The turn is not a pending model turn (already filled, or a user turn).
    AlreadyFilled { id: TurnId },
    /// Filling with empty text would leave the turn pending.
    EmptyText { id: TurnId },
}

impl fmt::Display for TranscriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TurnNotFound { id } => write!(f, "turn not found: {id}"),
            Self::AlreadyFilled { id } => write!(f, "turn is not awaiting a reply: {id}"),
            Self::EmptyText { id } => write!(f, "cannot fill turn {id} with empty text"),
        }
    }
}

impl std::error::Error for TranscriptError {}
