//! Tesseract OCR engine.

use tempfile::TempDir;
use tokio::process::Command;

use crate::{command::check_for_command_failure, prelude::*};

use super::{OcrBackend, OcrSession, Recognition};

/// [`OcrBackend`] wrapping the `tesseract` CLI tool.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct TesseractBackend {}

impl TesseractBackend {
    /// Create a new `tesseract` engine.
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl OcrBackend for TesseractBackend {
    #[instrument(level = "debug", skip(self))]
    async fn initialize(&self, language: &str) -> Result<Box<dyn OcrSession>> {
        let output = Command::new("tesseract")
            .arg("--list-langs")
            .output()
            .await
            .context("cannot run tesseract")?;
        check_for_command_failure("tesseract", &output, None)?;
        let available = parse_language_list(&String::from_utf8_lossy(&output.stdout));
        if let Some(missing) = language
            .split('+')
            .find(|lang| !available.iter().any(|a| a == lang))
        {
            return Err(anyhow!(
                "tesseract has no {:?} language data (available: {})",
                missing,
                available.join(", ")
            ));
        }

        let scratch =
            TempDir::with_prefix("tesseract").context("cannot create tesseract scratch dir")?;
        debug!(scratch = %scratch.path().display(), "Started tesseract session");
        Ok(Box::new(TesseractSession {
            language: language.to_owned(),
            scratch,
        }))
    }
}

/// A tesseract "session". The CLI loads its models on every call, so all we
/// hold is a scratch directory for its output files.
struct TesseractSession {
    language: String,
    scratch: TempDir,
}

#[async_trait]
impl OcrSession for TesseractSession {
    #[instrument(level = "debug", skip_all, fields(image = %image.display()))]
    async fn recognize(&mut self, image: &Path) -> Result<Recognition> {
        // tesseract appends `.txt` and `.hocr` to this for each config.
        let output_base = self.scratch.path().join("page");
        let output = Command::new("tesseract")
            .arg(image)
            .arg(&output_base)
            .arg("-l")
            .arg(&self.language)
            .arg("txt")
            .arg("hocr")
            .output()
            .await
            .context("cannot run tesseract")?;
        check_for_command_failure("tesseract", &output, None)?;

        let text = take_output(&output_base.with_extension("txt"), "text").await?;
        let markup = take_output(&output_base.with_extension("hocr"), "hOCR").await?;
        Ok(Recognition { text, markup })
    }

    async fn shutdown(self: Box<Self>) -> Result<()> {
        let path = self.scratch.path().to_owned();
        self.scratch.close().with_context(|| {
            format!("failed to delete tesseract scratch dir {:?}", path.display())
        })
    }
}

/// Read one of tesseract's output files and delete it, so that a stale file
/// can never be mistaken for the next page's output.
async fn take_output(path: &Path, kind: &str) -> Result<String> {
    let output = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read tesseract {kind} output"))?;
    tokio::fs::remove_file(path)
        .await
        .with_context(|| format!("cannot remove tesseract {kind} output"))?;
    Ok(output)
}

/// Parse `tesseract --list-langs` output into language codes.
fn parse_language_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of available languages"))
        .map(str::to_owned)
        .collect()
}
