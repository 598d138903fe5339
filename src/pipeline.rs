//! The document pipeline. Each PDF is rendered to page images, the images are
//! run through OCR, and the text is handed to an extractor for invoice fields.
//!
//! Documents go through the stages strictly one at a time. Within a document,
//! every page is rasterized before any page is recognized, and recognition
//! finishes before extraction starts. Conversion and recognition errors abort
//! the whole batch; extraction errors are recorded and the batch continues.

use indicatif::ProgressBar;
use tokio::{fs::File, io::AsyncWriteExt as _};

use crate::{
    config::{Config, page_image_base_name},
    extract::{ExtractionOutcome, Extractor},
    ocr::{OcrBackend, OcrSession},
    prelude::*,
    rasterize::{PageSize, Rasterizer, RenderOptions},
    run_record::{
        BatchRun, ConversionStage, ExtractionStage, RasterSettings, RecognitionStage,
        RunRecord, RunRecordBuilder, StageTimer,
    },
};

/// Pages are rendered at this multiple of their size in points. Small scans
/// OCR much better when upscaled.
pub const UPSCALE_FACTOR: u32 = 3;

/// Which documents to process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// One document, by base name.
    Single(String),
    /// Every PDF in the input directory.
    All,
}

/// Resolve a [`RunMode`] into document base names, in processing order.
#[instrument(level = "debug", skip(config))]
pub async fn list_documents(config: &Config, mode: &RunMode) -> Result<Vec<String>> {
    match mode {
        RunMode::Single(name) => {
            Ok(vec![name.strip_suffix(".pdf").unwrap_or(name).to_owned()])
        }
        RunMode::All => {
            let input_dir = &config.input_dir;
            let mut entries = tokio::fs::read_dir(input_dir).await.with_context(|| {
                format!("failed to read input directory {:?}", input_dir.display())
            })?;
            let mut names = vec![];
            while let Some(entry) = entries.next_entry().await.with_context(|| {
                format!("failed to read entry in {:?}", input_dir.display())
            })? {
                let file_name = entry.file_name();
                let Some(file_name) = file_name.to_str() else {
                    warn!(?file_name, "Skipping file with non-UTF-8 name");
                    continue;
                };
                if let Some(name) = file_name.strip_suffix(".pdf") {
                    names.push(name.to_owned());
                }
            }
            // Directory order varies by platform. Sort so analytics are
            // reproducible.
            names.sort();
            Ok(names)
        }
    }
}

/// Runs documents through the external adapters.
pub struct Pipeline<'a> {
    config: &'a Config,
    rasterizer: &'a dyn Rasterizer,
    ocr: &'a dyn OcrBackend,
    extractor: &'a dyn Extractor,
}

impl<'a> Pipeline<'a> {
    /// Create a pipeline that writes under `config.output_dir`.
    pub fn new(
        config: &'a Config,
        rasterizer: &'a dyn Rasterizer,
        ocr: &'a dyn OcrBackend,
        extractor: &'a dyn Extractor,
    ) -> Self {
        Self {
            config,
            rasterizer,
            ocr,
            extractor,
        }
    }

    /// Process every document in order, stopping at the first conversion or
    /// recognition failure.
    #[instrument(level = "debug", skip_all, fields(documents = documents.len()))]
    pub async fn run(&self, documents: &[String], progress: &ProgressBar) -> Result<BatchRun> {
        let mut batch = BatchRun::new();
        for name in documents {
            progress.set_message(format!("{name}.pdf"));
            let record = self.process_document(name).await?;
            batch.push(record);
            progress.inc(1);
        }
        Ok(batch)
    }

    /// Run one document through all three stages.
    #[instrument(level = "debug", skip(self))]
    pub async fn process_document(&self, name: &str) -> Result<RunRecord> {
        let builder = RunRecordBuilder::new(format!("{name}.pdf"));

        let conversion = self
            .convert(name)
            .await
            .with_context(|| format!("failed to convert {name}.pdf"))?;
        let builder = builder.converted(conversion)?;
        debug!(document = builder.filename(), state = %builder.state());

        let conversion = builder.conversion().context("missing conversion stage")?;
        let recognition = self
            .recognize(name, conversion)
            .await
            .with_context(|| format!("failed to recognize {name}.pdf"))?;
        let builder = builder.recognized(recognition)?;
        debug!(document = builder.filename(), state = %builder.state());

        let recognition = builder.recognition().context("missing recognition stage")?;
        let extraction = self.extract(name, recognition).await;
        builder.extracted(extraction)?.finish()
    }

    /// Rasterize every page of a document.
    async fn convert(&self, name: &str) -> Result<ConversionStage> {
        let timer = StageTimer::start();
        let config = self.config;
        info!("Converting {name}.pdf to images...");

        let pdf_path = config.document_path(name);
        let pdf = tokio::fs::read(&pdf_path)
            .await
            .with_context(|| format!("failed to read {:?}", pdf_path.display()))?;
        let info = self.rasterizer.inspect(&pdf_path).await?;
        if info.page_count == 0 {
            return Err(anyhow!("{:?} has no pages", pdf_path.display()));
        }

        tokio::fs::create_dir_all(&config.output_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to create output directory {:?}",
                    config.output_dir.display()
                )
            })?;

        let (width, height) = raster_dimensions(info.page_size);
        let settings = RasterSettings {
            format: config.image_format,
            density: config.density,
            quality: config.quality,
            upscale_factor: UPSCALE_FACTOR,
            width,
            height,
            preserve_aspect_ratio: true,
        };

        let mut pages = Vec::with_capacity(info.page_count);
        for page in 1..=info.page_count {
            let base_name = page_image_base_name(name, page);
            let options = RenderOptions {
                format: settings.format,
                density: settings.density,
                quality: settings.quality,
                width,
                height,
                preserve_aspect_ratio: settings.preserve_aspect_ratio,
                output_dir: &config.output_dir,
                output_base_name: &base_name,
            };
            let rendered = self
                .rasterizer
                .render(&pdf, page, &options)
                .await
                .with_context(|| format!("failed to rasterize page {page}"))?;
            debug!(page, path = %rendered.path.display(), "Page was converted to image");
            pages.push(rendered);
        }

        let timing = timer.finish();
        info!(
            "Conversion of {} pages took: {}s.",
            info.page_count,
            timing.seconds()
        );
        Ok(ConversionStage {
            timing,
            settings,
            page_count: info.page_count,
            source_page_size: info.page_size,
            pages,
        })
    }

    /// OCR every page image of a document into one text file and one markup
    /// file.
    async fn recognize(
        &self,
        name: &str,
        conversion: &ConversionStage,
    ) -> Result<RecognitionStage> {
        let timer = StageTimer::start_after(&conversion.timing);
        let config = self.config;
        info!("Recognizing {name}.pdf with {}...", config.language);

        // Truncate output left over from an earlier run of this document.
        let text_path = config.text_output_path(name);
        let markup_path = config.markup_output_path(name);
        let mut text_file = File::create(&text_path)
            .await
            .with_context(|| format!("failed to create {:?}", text_path.display()))?;
        let mut markup_file = File::create(&markup_path)
            .await
            .with_context(|| format!("failed to create {:?}", markup_path.display()))?;

        let mut session = self
            .ocr
            .initialize(&config.language)
            .await
            .context("failed to start OCR engine")?;
        let result = self
            .recognize_pages(
                name,
                conversion.page_count,
                session.as_mut(),
                &mut text_file,
                &mut markup_file,
            )
            .await;
        let shutdown = session
            .shutdown()
            .await
            .context("failed to shut down OCR engine");
        let images = result?;
        shutdown?;

        let text = tokio::fs::read_to_string(&text_path)
            .await
            .with_context(|| format!("failed to read back {:?}", text_path.display()))?;
        let word_count = count_words(&text);
        info!("Recognition found {word_count} words.");
        debug!(%text, "Recognized text");

        let timing = timer.finish();
        info!("Recognition took: {}s.", timing.seconds());
        Ok(RecognitionStage {
            timing,
            images,
            text_path,
            markup_path,
            text,
            word_count,
        })
    }

    /// Recognize pages in order, appending to the output files.
    async fn recognize_pages(
        &self,
        name: &str,
        page_count: usize,
        session: &mut dyn OcrSession,
        text_file: &mut File,
        markup_file: &mut File,
    ) -> Result<Vec<PathBuf>> {
        let mut images = Vec::with_capacity(page_count);
        for page in 1..=page_count {
            let image = self.config.page_image_path(name, page);
            let recognition = session
                .recognize(&image)
                .await
                .with_context(|| format!("failed to recognize {:?}", image.display()))?;
            text_file
                .write_all(flatten_newlines(&recognition.text).as_bytes())
                .await
                .context("failed to append recognized text")?;
            markup_file
                .write_all(recognition.markup.as_bytes())
                .await
                .context("failed to append recognized markup")?;
            debug!(page, "Page was recognized");
            images.push(image);
        }
        text_file.flush().await.context("failed to flush recognized text")?;
        markup_file
            .flush()
            .await
            .context("failed to flush recognized markup")?;
        Ok(images)
    }

    /// Ask the extractor for invoice fields. Never fails.
    async fn extract(&self, name: &str, recognition: &RecognitionStage) -> ExtractionStage {
        let timer = StageTimer::start_after(&recognition.timing);
        info!("Analyzing text for {name}.pdf to find assignable properties...");

        let outcome = self.extractor.extract(&recognition.text).await;
        match &outcome {
            ExtractionOutcome::Extracted(fields) => {
                info!(fields = fields.len(), "Found invoice fields in {name}.pdf");
                debug!(?fields, "Extracted fields");
            }
            ExtractionOutcome::Failed { error } => {
                error!("Extraction failed for {name}.pdf: {error}");
            }
        }

        let timing = timer.finish();
        info!("Analyzing took: {}s.", timing.seconds());
        let (result, error) = outcome.into_parts();
        ExtractionStage {
            timing,
            result,
            error,
        }
    }
}

/// Pixel size for pages of the given size in points.
pub fn raster_dimensions(size: PageSize) -> (u32, u32) {
    let scale = |points: f64| (points * f64::from(UPSCALE_FACTOR)).round() as u32;
    (scale(size.width), scale(size.height))
}

/// Replace every line break with a single space.
pub fn flatten_newlines(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Count whitespace-separated words.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}
