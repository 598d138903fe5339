//! Structured field extraction from OCR text.

use serde_json::Map;

use crate::prelude::*;

pub mod llama;
pub mod prompt;

/// Fields found in an invoice, keyed by the names in
/// [`prompt::FIELD_CATALOGUE`]. Whatever JSON object the model returns is
/// accepted as-is.
pub type ExtractionResult = Map<String, Value>;

/// What happened when we asked for an extraction. Failures never abort a
/// batch, so they are values rather than errors.
#[derive(Clone, Debug, PartialEq)]
pub enum ExtractionOutcome {
    Extracted(ExtractionResult),
    Failed { error: String },
}

impl ExtractionOutcome {
    /// Build an outcome from a fallible extraction attempt.
    pub fn from_result(result: Result<ExtractionResult>) -> Self {
        match result {
            Ok(fields) => ExtractionOutcome::Extracted(fields),
            Err(err) => ExtractionOutcome::Failed {
                error: format!("{err:#}"),
            },
        }
    }

    /// Split into the result and the error message.
    pub fn into_parts(self) -> (Option<ExtractionResult>, Option<String>) {
        match self {
            ExtractionOutcome::Extracted(fields) => (Some(fields), None),
            ExtractionOutcome::Failed { error } => (None, Some(error)),
        }
    }
}

/// Something that can pull invoice fields out of OCR text.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str) -> ExtractionOutcome;
}
