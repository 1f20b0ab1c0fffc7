//! Error types for the AI crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ModelError`: Remote model backend operations
//! - `AttachmentError`: Image attachment construction

use std::fmt;

/// Errors from model backend operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Request could not be sent or the provider returned an error status.
    RequestFailed {
        status: Option<u16>,
        reason: String,
    },
    /// Response body could not be decoded.
    ResponseParseFailed { reason: String },
    /// The provider answered but produced no text.
    EmptyResponse,
    /// The provider refused to answer the prompt.
    Blocked { reason: String },
    /// Timeout waiting for response.
    Timeout,
    /// Rate limit exceeded.
    RateLimited { retry_after_secs: Option<u64> },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestFailed {
                status: Some(status),
                reason,
            } => write!(f, "model request failed with status {status}: {reason}"),
            Self::RequestFailed {
                status: None,
                reason,
            } => write!(f, "model request failed: {reason}"),
            Self::ResponseParseFailed { reason } => {
                write!(f, "failed to parse model response: {reason}")
            }
            Self::EmptyResponse => write!(f, "model returned no text"),
            Self::Blocked { reason } => write!(f, "prompt blocked by model: {reason}"),
            Self::Timeout => write!(f, "model request timed out"),
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid model configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

/// Errors from attachment construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentError {
    /// No bytes were supplied.
    Empty,
    /// The bytes are not an image format the model accepts.
    UnsupportedFormat { detected: Option<String> },
    /// The supplied MIME type is not an image type.
    InvalidMimeType { mime_type: String },
}

impl fmt::Display for AttachmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "attachment is empty"),
            Self::UnsupportedFormat {
                detected: Some(detected),
            } => write!(f, "unsupported attachment format: {detected}"),
            Self::UnsupportedFormat { detected: None } => {
                write!(f, "attachment is not a recognised image")
            }
            Self::InvalidMimeType { mime_type } => {
                write!(f, "not an image MIME type: {mime_type}")
            }
        }
    }
}

impl std::error::Error for AttachmentError {}
