//! Prints the transcript as it changes.

use parley_ai::Role;
use parley_conversation::{Turn, TranscriptView};
use parley_core::TurnId;
use tokio_stream::StreamExt;

/// Turns transcript snapshots into lines, printing each completed turn once.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    /// Index of the first turn not yet printed.
    next: usize,
    /// The placeholder already announced as pending.
    announced: Option<TurnId>,
}

impl TranscriptPrinter {
    /// Creates a printer that has printed nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lines to print for a snapshot.
    ///
    /// Printing stops at a pending turn, which is announced once and
    /// printed in full after it has been filled.
    pub fn lines_for(&mut self, turns: &[Turn]) -> Vec<String> {
        let mut lines = Vec::new();
        if turns.len() < self.next {
            // Transcript replaced; start over.
            self.next = 0;
            self.announced = None;
        }

        for turn in &turns[self.next..] {
            if turn.is_pending() {
                if self.announced != Some(turn.id()) {
                    lines.push("model> ...".to_string());
                    self.announced = Some(turn.id());
                }
                break;
            }
            lines.push(format_turn(turn));
            self.next += 1;
        }
        lines
    }

    /// Prints every change of `view` to stdout until the transcript is dropped.
    pub async fn run(mut self, view: TranscriptView) {
        let mut changes = view.changes();
        while let Some(snapshot) = changes.next().await {
            for line in self.lines_for(&snapshot) {
                println!("{line}");
            }
        }
    }
}

fn format_turn(turn: &Turn) -> String {
    let label = match turn.role() {
        Role::User => "you",
        Role::Model => "model",
    };
    match turn.attachments().len() {
        0 => format!("{label}> {}", turn.text()),
        1 => format!("{label}> {} [1 image]", turn.text()),
        n => format!("{label}> {} [{n} images]", turn.text()),
    }
}
