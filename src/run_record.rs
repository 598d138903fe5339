//! Per-document analytics.
//!
//! A [`RunRecordBuilder`] is created when we start on a document, handed each
//! stage's results in order, and turned into an immutable [`RunRecord`] when
//! the document is done. Finished records are collected into a [`BatchRun`].

use std::{fmt, time::Instant};

use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    config::ImageFormat,
    extract::ExtractionResult,
    prelude::*,
    rasterize::{PageSize, RasterizedPage},
};

/// When a stage ran.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct StageTiming {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_ms: u64,
}

impl StageTiming {
    /// Duration in seconds, for log messages.
    pub fn seconds(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }
}

/// Measures a stage. The end time is derived from a monotonic clock, so it is
/// never before the start, even if the wall clock jumps.
#[derive(Debug)]
pub struct StageTimer {
    start: DateTime<Utc>,
    started: Instant,
}

impl StageTimer {
    /// Start timing the first stage of a document.
    pub fn start() -> Self {
        Self {
            start: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Start timing a stage that follows `previous`. The start is clamped to
    /// `previous.end`.
    pub fn start_after(previous: &StageTiming) -> Self {
        Self {
            start: Utc::now().max(previous.end),
            started: Instant::now(),
        }
    }

    /// Stop the timer.
    pub fn finish(self) -> StageTiming {
        let elapsed = self.started.elapsed();
        let end = self.start + TimeDelta::from_std(elapsed).unwrap_or_default();
        StageTiming {
            start: self.start,
            end,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Rasterization settings actually used for a document.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RasterSettings {
    pub format: ImageFormat,
    pub density: u32,
    pub quality: u8,
    pub upscale_factor: u32,
    pub width: u32,
    pub height: u32,
    pub preserve_aspect_ratio: bool,
}

/// Results of converting a PDF into page images.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ConversionStage {
    pub timing: StageTiming,
    pub settings: RasterSettings,
    pub page_count: usize,
    pub source_page_size: PageSize,
    pub pages: Vec<RasterizedPage>,
}

/// Results of running OCR over every page image.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RecognitionStage {
    pub timing: StageTiming,
    pub images: Vec<PathBuf>,
    pub text_path: PathBuf,
    pub markup_path: PathBuf,
    pub text: String,
    pub word_count: usize,
}

/// Results of asking the completion server for invoice fields.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ExtractionStage {
    pub timing: StageTiming,
    pub result: Option<ExtractionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything we learned while processing one document.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RunRecord {
    pub filename: String,
    pub page_count: usize,
    pub conversion: ConversionStage,
    pub recognition: RecognitionStage,
    pub extraction: ExtractionStage,
}

/// How far a [`RunRecordBuilder`] has got.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Created,
    Converted,
    Recognized,
    Extracted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Created => write!(f, "created"),
            RunState::Converted => write!(f, "converted"),
            RunState::Recognized => write!(f, "recognized"),
            RunState::Extracted => write!(f, "extracted"),
        }
    }
}

/// Accumulates a [`RunRecord`] one stage at a time.
#[derive(Debug)]
pub struct RunRecordBuilder {
    filename: String,
    conversion: Option<ConversionStage>,
    recognition: Option<RecognitionStage>,
    extraction: Option<ExtractionStage>,
}

impl RunRecordBuilder {
    /// Start a record for the source file `filename`.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            conversion: None,
            recognition: None,
            extraction: None,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn state(&self) -> RunState {
        if self.extraction.is_some() {
            RunState::Extracted
        } else if self.recognition.is_some() {
            RunState::Recognized
        } else if self.conversion.is_some() {
            RunState::Converted
        } else {
            RunState::Created
        }
    }

    pub fn conversion(&self) -> Option<&ConversionStage> {
        self.conversion.as_ref()
    }

    pub fn recognition(&self) -> Option<&RecognitionStage> {
        self.recognition.as_ref()
    }

    /// Record the conversion stage.
    pub fn converted(mut self, stage: ConversionStage) -> Result<Self> {
        self.expect_state(RunState::Created)?;
        if stage.pages.len() != stage.page_count {
            return Err(anyhow!(
                "{}: rasterized {} pages but the document has {}",
                self.filename,
                stage.pages.len(),
                stage.page_count
            ));
        }
        self.conversion = Some(stage);
        Ok(self)
    }

    /// Record the recognition stage.
    pub fn recognized(mut self, stage: RecognitionStage) -> Result<Self> {
        self.expect_state(RunState::Converted)?;
        let conversion = self.conversion.as_ref().context("missing conversion stage")?;
        if stage.images.len() != conversion.page_count {
            return Err(anyhow!(
                "{}: recognized {} pages but the document has {}",
                self.filename,
                stage.images.len(),
                conversion.page_count
            ));
        }
        check_order(&conversion.timing, &stage.timing)?;
        self.recognition = Some(stage);
        Ok(self)
    }

    /// Record the extraction stage.
    pub fn extracted(mut self, stage: ExtractionStage) -> Result<Self> {
        self.expect_state(RunState::Recognized)?;
        let recognition = self
            .recognition
            .as_ref()
            .context("missing recognition stage")?;
        check_order(&recognition.timing, &stage.timing)?;
        self.extraction = Some(stage);
        Ok(self)
    }

    /// Turn a fully populated builder into a [`RunRecord`].
    pub fn finish(self) -> Result<RunRecord> {
        match self {
            RunRecordBuilder {
                filename,
                conversion: Some(conversion),
                recognition: Some(recognition),
                extraction: Some(extraction),
            } => Ok(RunRecord {
                filename,
                page_count: conversion.page_count,
                conversion,
                recognition,
                extraction,
            }),
            builder => Err(anyhow!(
                "cannot finish run record for {} in state {}",
                builder.filename,
                builder.state()
            )),
        }
    }

    fn expect_state(&self, expected: RunState) -> Result<()> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(anyhow!(
                "run record for {} is {}, expected {}",
                self.filename,
                state,
                expected
            ))
        }
    }
}

/// Stages must not overlap.
fn check_order(previous: &StageTiming, next: &StageTiming) -> Result<()> {
    if next.start < previous.end {
        Err(anyhow!(
            "stage started at {} before the previous stage ended at {}",
            next.start,
            previous.end
        ))
    } else {
        Ok(())
    }
}

/// All the records produced by one invocation, in processing order.
#[derive(Debug, Default)]
pub struct BatchRun {
    records: Vec<RunRecord>,
}

impl BatchRun {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: RunRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[RunRecord] {
        &self.records
    }
}
