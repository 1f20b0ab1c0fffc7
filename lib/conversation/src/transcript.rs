//! Transcript store: the ordered, observable history of one conversation.
//!
//! Turns live in a `watch` channel as an `Arc<Vec<Turn>>`. Mutations go
//! through `Arc::make_mut`, so a [`Snapshot`] handed out earlier keeps the
//! old vector and is never affected by later appends or fills. Every mutation
//! notifies subscribers synchronously before returning.
//!
//! The only in-place mutation is filling a pending model turn, and that is
//! done through the [`PendingReply`] handle returned when the turn was
//! appended. `fill` consumes the handle, so a reply cannot be written twice.

use crate::error::TranscriptError;
use crate::turn::Turn;
use parley_core::{Result, TurnId};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, warn};

type Turns = Arc<Vec<Turn>>;

/// An immutable view of the transcript at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot(Turns);

impl Snapshot {
    /// Returns the number of pending model turns (zero or one).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.0.iter().filter(|t| t.is_pending()).count()
    }

    /// Returns the turn with the given id.
    #[must_use]
    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.0.iter().find(|t| t.id() == id)
    }
}

impl Deref for Snapshot {
    type Target = [Turn];

    fn deref(&self) -> &[Turn] {
        &self.0
    }
}

/// Read-only access to a transcript, for the presentation layer.
#[derive(Debug, Clone)]
pub struct TranscriptView {
    turns: Arc<watch::Sender<Turns>>,
}

impl TranscriptView {
    /// Returns the current turns in append order.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.turns.borrow().clone())
    }

    /// Returns the number of turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.borrow().len()
    }

    /// Returns true if no turns have been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.borrow().is_empty()
    }

    /// Subscribes to change notifications.
    #[must_use]
    pub fn subscribe(&self) -> TranscriptSubscription {
        TranscriptSubscription {
            rx: self.turns.subscribe(),
        }
    }

    /// Returns a stream yielding the current snapshot, then one per change.
    ///
    /// Changes that land while the consumer is busy are coalesced into the
    /// latest snapshot.
    pub fn changes(&self) -> impl Stream<Item = Snapshot> + Send + Unpin + use<> {
        WatchStream::new(self.turns.subscribe()).map(Snapshot)
    }
}

/// A change subscription on a transcript.
#[derive(Debug)]
pub struct TranscriptSubscription {
    rx: watch::Receiver<Turns>,
}

impl TranscriptSubscription {
    /// Waits for the next change.
    ///
    /// Returns false once the transcript has been dropped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Returns true if a change has not been observed yet.
    #[must_use]
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Returns the latest snapshot and marks it as seen.
    pub fn snapshot(&mut self) -> Snapshot {
        Snapshot(self.rx.borrow_and_update().clone())
    }
}

/// The writable transcript owned by an orchestrator.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    turns: Arc<watch::Sender<Turns>>,
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptStore {
    /// Creates an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Turns::default());
        Self {
            turns: Arc::new(tx),
        }
    }

    /// Returns a read-only view sharing this transcript.
    #[must_use]
    pub fn view(&self) -> TranscriptView {
        TranscriptView {
            turns: Arc::clone(&self.turns),
        }
    }

    /// Returns the current turns in append order.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.turns.borrow().clone())
    }

    /// Appends a turn at the end.
    pub fn append(&self, turn: Turn) {
        self.turns.send_modify(|turns| {
            debug_assert!(
                turns.iter().all(|t| t.id() != turn.id()),
                "duplicate turn id {}",
                turn.id()
            );
            Arc::make_mut(turns).push(turn);
        });
    }

    /// Appends a user turn and its pending model reply as one change.
    ///
    /// Observers never see the prompt without its placeholder. If the
    /// returned handle is dropped unfilled, the placeholder receives
    /// `abandoned_text`.
    pub fn append_exchange(&self, prompt: Turn, abandoned_text: impl Into<String>) -> PendingReply {
        let placeholder = Turn::placeholder();
        let id = placeholder.id();
        self.turns.send_modify(|turns| {
            debug_assert!(
                turns.iter().all(|t| t.id() != prompt.id()),
                "duplicate turn id {}",
                prompt.id()
            );
            let turns = Arc::make_mut(turns);
            turns.push(prompt);
            turns.push(placeholder);
        });
        PendingReply {
            store: self.clone(),
            id,
            abandoned_text: abandoned_text.into(),
            filled: false,
        }
    }

    /// Replaces the text of a pending model turn.
    ///
    /// # Errors
    ///
    /// Returns an error if the turn does not exist, is not pending, or
    /// `text` is empty. The transcript is unchanged and no notification is
    /// sent in that case.
    pub fn update_text(&self, id: TurnId, text: impl Into<String>) -> Result<(), TranscriptError> {
        let text = text.into();
        if text.is_empty() {
            return Err(TranscriptError::EmptyText { id }.into());
        }

        let mut outcome = Err(TranscriptError::TurnNotFound { id });
        self.turns.send_if_modified(|turns| {
            let Some(index) = turns.iter().rposition(|t| t.id() == id) else {
                return false;
            };
            if !turns[index].is_pending() {
                outcome = Err(TranscriptError::AlreadyFilled { id });
                return false;
            }
            Arc::make_mut(turns)[index].set_text(text);
            outcome = Ok(());
            true
        });
        outcome.map_err(Into::into)
    }
}

/// Write access to exactly one pending model turn.
#[must_use = "dropping a pending reply fills it with the abandoned text"]
#[derive(Debug)]
pub struct PendingReply {
    store: TranscriptStore,
    id: TurnId,
    abandoned_text: String,
    filled: bool,
}

impl PendingReply {
    /// Returns the id of the pending model turn.
    #[must_use]
    pub fn id(&self) -> TurnId {
        self.id
    }

    /// Writes the reply text.
    ///
    /// # Errors
    ///
    /// Returns an error if `text` is empty; the turn then receives the
    /// abandoned text instead.
    pub fn fill(mut self, text: impl Into<String>) -> Result<(), TranscriptError> {
        self.store.update_text(self.id, text)?;
        self.filled = true;
        Ok(())
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.filled {
            return;
        }
        warn!(turn = %self.id, "pending reply dropped before it was filled");
        let text = std::mem::take(&mut self.abandoned_text);
        if let Err(report) = self.store.update_text(self.id, text) {
            error!(turn = %self.id, error = %report, "failed to close abandoned reply");
        }
    }
}
