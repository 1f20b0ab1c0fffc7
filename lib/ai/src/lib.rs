//! Model access for parley.
//!
//! This crate provides:
//!
//! - **Backend**: the [`ModelBackend`] trait and its request/response types
//! - **Attachments**: validated, cheaply shared image payloads
//! - **Gemini**: a [`ModelBackend`] over the Google Generative Language API

pub mod attachment;
pub mod backend;
pub mod error;
pub mod gemini;

pub use attachment::{Attachment, ImageFormat};
pub use backend::{GenerateRequest, GenerateResponse, HistoryEntry, ModelBackend, Role, TokenUsage};
pub use error::{AttachmentError, ModelError};
pub use gemini::{GeminiBackend, GeminiConfig};
