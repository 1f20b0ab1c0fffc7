//! Command-line input: slash commands and the pending image buffer.

use crate::error::ChatError;
use parley_ai::{Attachment, ImageFormat};
use parley_core::Result;
use std::path::{Path, PathBuf};

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send the text with the buffered images.
    Send(String),
    /// Add an image file to the buffer.
    Attach(PathBuf),
    /// Empty the buffer.
    Clear,
    /// Show usage.
    Help,
    /// Leave the program.
    Quit,
}

impl Command {
    /// Parses a line typed at the prompt.
    ///
    /// Anything that is not a known slash command is sent verbatim.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let (word, rest) = trimmed
            .split_once(char::is_whitespace)
            .map_or((trimmed, ""), |(w, r)| (w, r.trim()));

        match word {
            "/attach" if !rest.is_empty() => Self::Attach(PathBuf::from(rest)),
            "/clear" => Self::Clear,
            "/help" => Self::Help,
            "/quit" | "/exit" => Self::Quit,
            _ => Self::Send(line.to_string()),
        }
    }
}

/// Images waiting to go out with the next message.
#[derive(Debug)]
pub struct AttachmentBuffer {
    items: Vec<Attachment>,
    max: usize,
}

impl AttachmentBuffer {
    /// Creates an empty buffer holding at most `max` images.
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            items: Vec::new(),
            max,
        }
    }

    /// Adds an image, returning the new count.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is full.
    pub fn push(&mut self, attachment: Attachment) -> Result<usize, ChatError> {
        if self.items.len() >= self.max {
            return Err(ChatError::TooManyAttachments { max: self.max }.into());
        }
        self.items.push(attachment);
        Ok(self.items.len())
    }

    /// Hands the buffered images over, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<Attachment> {
        std::mem::take(&mut self.items)
    }

    /// Drops the buffered images.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Returns the number of buffered images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns the configured limit.
    #[must_use]
    pub fn max(&self) -> usize {
        self.max
    }
}

/// Reads an image file into an attachment.
///
/// HEIC and HEIF files are identified by their extension; everything else
/// by its contents.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a supported image.
pub async fn load_attachment(path: &Path) -> Result<Attachment, ChatError> {
    let attachment_error = |reason: String| ChatError::Attachment {
        path: path.display().to_string(),
        reason,
    };

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| attachment_error(e.to_string()))?;
    let declared = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ImageFormat::from_extension);
    let attachment = match declared {
        // Not detectable from contents.
        Some(format @ (ImageFormat::Heic | ImageFormat::Heif)) => {
            Attachment::with_mime_type(format.mime_type(), bytes)
        }
        _ => Attachment::from_bytes(bytes),
    }
    .map_err(|report| attachment_error(report.to_string()))?;
    Ok(attachment)
}
