//! OCR engine interface.
//!
//! An engine is started once per document with [`OcrBackend::initialize`],
//! used for every page of that document, and then shut down. Loading language
//! models is the expensive part, so sessions are never shared across
//! documents.

use crate::prelude::*;

pub mod tesseract;

/// Output of recognizing a single page image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Recognition {
    /// Plain text, as the engine laid it out (newlines included).
    pub text: String,
    /// Positional markup (hOCR) for the page.
    pub markup: String,
}

/// Something that can start OCR sessions.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Start a session for the given language code.
    async fn initialize(&self, language: &str) -> Result<Box<dyn OcrSession>>;
}

/// A running OCR engine.
#[async_trait]
pub trait OcrSession: Send {
    /// Recognize a single page image.
    async fn recognize(&mut self, image: &Path) -> Result<Recognition>;

    /// Release everything held by this session.
    async fn shutdown(self: Box<Self>) -> Result<()>;
}
