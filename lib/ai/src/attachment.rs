//! Image attachments for multimodal requests.
//!
//! Attachments are immutable once built. The byte buffer is shared, so cloning
//! an attachment into a turn, a snapshot, and an outgoing request never copies
//! the image itself.

use crate::error::AttachmentError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use parley_core::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Image encodings accepted by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
    Heic,
    Heif,
}

impl ImageFormat {
    /// Returns the MIME type sent alongside the image data.
    #[must_use]
    pub const fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
            Self::Heic => "image/heic",
            Self::Heif => "image/heif",
        }
    }

    /// Parses a MIME type, ignoring case and parameters.
    #[must_use]
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::Webp),
            "image/heic" => Some(Self::Heic),
            "image/heif" => Some(Self::Heif),
            _ => None,
        }
    }

    /// Parses a file extension, ignoring case.
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            "heic" => Some(Self::Heic),
            "heif" => Some(Self::Heif),
            _ => None,
        }
    }

    /// Detects the format from the image contents.
    ///
    /// Only PNG, JPEG and WebP are detected. HEIC and HEIF share their
    /// container with other formats and must be declared by the caller.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::WebP => Some(Self::Webp),
            _ => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Names an image format the model does not accept, for error messages.
fn recognise_unsupported(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

/// An image attached to a user turn.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    format: ImageFormat,
    data: Arc<[u8]>,
}

impl Attachment {
    /// Builds an attachment, detecting the image format from its contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are empty or not a supported image.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, AttachmentError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(AttachmentError::Empty.into());
        }
        let format = ImageFormat::sniff(&bytes).ok_or_else(|| AttachmentError::UnsupportedFormat {
            detected: recognise_unsupported(&bytes).map(str::to_string),
        })?;
        Ok(Self {
            format,
            data: bytes.into(),
        })
    }

    /// Builds an attachment from bytes whose MIME type the caller already knows.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are empty or the MIME type is not a
    /// supported image type.
    pub fn with_mime_type(
        mime_type: &str,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<Self, AttachmentError> {
        let format =
            ImageFormat::from_mime_type(mime_type).ok_or_else(|| AttachmentError::InvalidMimeType {
                mime_type: mime_type.to_string(),
            })?;
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(AttachmentError::Empty.into());
        }
        Ok(Self {
            format,
            data: bytes.into(),
        })
    }

    /// Returns the image format.
    #[must_use]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Returns the MIME type of the image.
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// Returns the raw image bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the size of the image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false: empty attachments are rejected at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the image bytes encoded as standard base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        B64.encode(&self.data)
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("format", &self.format)
            .field("len", &self.data.len())
            .finish()
    }
}
