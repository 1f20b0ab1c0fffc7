//! Error types for the terminal front end.

use std::fmt;

/// Errors surfaced to the person at the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// An image could not be read or is not usable.
    Attachment {
        /// The path that was given.
        path: String,
        /// Why it was refused.
        reason: String,
    },
    /// The attachment buffer is full.
    TooManyAttachments {
        /// The configured limit.
        max: usize,
    },
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attachment { path, reason } => {
                write!(f, "cannot attach {path}: {reason}")
            }
            Self::TooManyAttachments { max } => {
                write!(f, "at most {max} images can be attached to one message")
            }
        }
    }
}

impl std::error::Error for ChatError {}
