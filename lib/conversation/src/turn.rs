//! Turns: the entries of a conversation transcript.

use chrono::{DateTime, Utc};
use parley_ai::{Attachment, HistoryEntry, Role};
use parley_core::TurnId;

/// One utterance in the transcript, attributed to the user or the model.
///
/// A model turn with empty text is a pending placeholder: the reply has not
/// arrived yet. Turns are only created and filled by the orchestrator, so the
/// fields are read-only outside this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    id: TurnId,
    role: Role,
    text: String,
    attachments: Vec<Attachment>,
    created_at: DateTime<Utc>,
}

impl Turn {
    /// Creates a user turn.
    pub(crate) fn user(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            id: TurnId::new(),
            role: Role::User,
            text: text.into(),
            attachments,
            created_at: Utc::now(),
        }
    }

    /// Creates a pending model turn.
    pub(crate) fn placeholder() -> Self {
        Self {
            id: TurnId::new(),
            role: Role::Model,
            text: String::new(),
            attachments: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub(crate) fn set_text(&mut self, text: String) {
        self.text = text;
    }

    /// Returns the turn's identifier.
    #[must_use]
    pub fn id(&self) -> TurnId {
        self.id
    }

    /// Returns who produced the turn.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the text, empty while a model turn is pending.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the attached images.
    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Returns when the turn was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns true for a model turn still awaiting its reply.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.role == Role::Model && self.text.is_empty()
    }

    /// Converts the turn into an entry of a model request.
    #[must_use]
    pub fn to_history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            role: self.role,
            text: self.text.clone(),
            attachments: self.attachments.clone(),
        }
    }
}
