//! Model backend abstraction.
//!
//! The orchestrator talks to the remote model only through [`ModelBackend`].
//! Backends are stateless per call: every request carries the full history.

use crate::attachment::Attachment;
use crate::error::ModelError;
use async_trait::async_trait;
use parley_core::Result;
use serde::{Deserialize, Serialize};

/// The speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person typing.
    User,
    /// The generative model.
    Model,
}

impl Role {
    /// Returns the wire name of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the history sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Who produced the entry.
    pub role: Role,
    /// The text of the entry.
    pub text: String,
    /// Images attached to the entry, in order.
    pub attachments: Vec<Attachment>,
}

impl HistoryEntry {
    /// Creates a user entry.
    #[must_use]
    pub fn user(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            attachments,
        }
    }

    /// Creates a model entry.
    #[must_use]
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
            attachments: Vec::new(),
        }
    }
}

/// A request to generate the next model turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateRequest {
    /// The conversation so far, oldest first.
    pub history: Vec<HistoryEntry>,
    /// System instruction, if any.
    pub system: Option<String>,
    /// Temperature for sampling.
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_output_tokens: Option<u32>,
}

impl GenerateRequest {
    /// Creates a request from an ordered history.
    #[must_use]
    pub fn new(history: Vec<HistoryEntry>) -> Self {
        Self {
            history,
            ..Self::default()
        }
    }

    /// Adds a system instruction.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the max output tokens.
    #[must_use]
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    /// Returns the total number of attachments across the history.
    #[must_use]
    pub fn attachment_count(&self) -> usize {
        self.history.iter().map(|e| e.attachments.len()).sum()
    }
}

/// A response from the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// The generated text.
    pub text: String,
    /// Token usage statistics.
    pub usage: TokenUsage,
    /// Model that generated the response.
    pub model: String,
}

impl GenerateResponse {
    /// Creates a response carrying only text.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input tokens.
    pub input_tokens: u32,
    /// Number of output tokens.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Returns the total number of tokens.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Trait for remote model backends.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Generates the next model turn for the given history.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or yields no usable text.
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ModelError>;

    /// Returns the model name.
    fn model(&self) -> &str;
}
