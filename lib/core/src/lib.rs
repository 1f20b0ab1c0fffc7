//! Core types shared by the parley crates.
//!
//! This crate provides strongly-typed identifiers and the rootcause-based
//! `Result` alias used throughout the conversation stack.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ConversationId, ParseIdError, TurnId};
