//! Conversation orchestration for parley.
//!
//! This crate provides:
//!
//! - **Turns**: user prompts and model replies, with attached images
//! - **Transcript Store**: the ordered, observable turn history
//! - **Orchestrator**: accepts sends, calls the model, reconciles replies

pub mod error;
pub mod orchestrator;
pub mod transcript;
pub mod turn;

pub use error::TranscriptError;
pub use orchestrator::{Orchestrator, OrchestratorConfig, SendOutcome};
pub use transcript::{
    PendingReply, Snapshot, TranscriptStore, TranscriptSubscription, TranscriptView,
};
pub use turn::Turn;
