//! Process invoices and record analytics.

use crate::{
    analytics::AnalyticsStore,
    cmd::ModeOpts,
    config::Config,
    extract::{Extractor, llama::LlamaCppExtractor},
    ocr::{OcrBackend, tesseract::TesseractBackend},
    pipeline::{Pipeline, RunMode, list_documents},
    prelude::*,
    rasterize::{PopplerRasterizer, Rasterizer},
    ui::{ProgressConfig, Ui},
};

/// Run the pipeline over the selected documents, then append the results to
/// the analytics history.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_run(ui: Ui, mode: &ModeOpts, config: &Config) -> Result<()> {
    // Check the mode before touching the filesystem.
    let mode = mode.run_mode()?;

    let rasterizer = PopplerRasterizer::new();
    let ocr = TesseractBackend::new();
    let extractor = LlamaCppExtractor::new(config)?;

    run_batch(&ui, config, &mode, &rasterizer, &ocr, &extractor).await?;
    Ok(())
}

/// List the documents for `mode`, process them, and flush the batch to the
/// analytics history. Returns the number of records in the history afterwards.
#[instrument(level = "debug", skip_all, fields(mode = ?mode))]
pub async fn run_batch(
    ui: &Ui,
    config: &Config,
    mode: &RunMode,
    rasterizer: &dyn Rasterizer,
    ocr: &dyn OcrBackend,
    extractor: &dyn Extractor,
) -> Result<usize> {
    let documents = list_documents(config, mode).await?;
    if documents.is_empty() {
        warn!(
            "No PDFs found in {:?}. Nothing to do.",
            config.input_dir.display()
        );
    }

    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "🧾",
            msg: "Processing invoices",
            done_msg: "Processed invoices",
        },
        u64::try_from(documents.len())?,
    );
    let batch = Pipeline::new(config, rasterizer, ocr, extractor)
        .run(&documents, &pb)
        .await?;
    pb.finish_using_style();

    AnalyticsStore::new(&config.analytics_file)
        .flush(&batch)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::test_config,
        pipeline::tests::{FakeExtractor, FakeOcr, FakeRasterizer},
    };

    /// Set up an input directory holding `files` and a history holding one
    /// earlier record.
    async fn workspace(root: &Path, files: &[&str]) -> Config {
        let config = test_config(root);
        tokio::fs::create_dir_all(&config.input_dir).await.unwrap();
        for file in files {
            tokio::fs::write(config.input_dir.join(file), b"%PDF-1.4 fake")
                .await
                .unwrap();
        }
        tokio::fs::write(
            &config.analytics_file,
            r#"{"records": [{"filename": "old.pdf"}]}"#,
        )
        .await
        .unwrap();
        config
    }

    async fn history_filenames(config: &Config) -> Vec<String> {
        AnalyticsStore::new(&config.analytics_file)
            .load()
            .await
            .unwrap()
            .records
            .iter()
            .map(|r| r["filename"].as_str().unwrap().to_owned())
            .collect()
    }

    #[tokio::test]
    async fn all_mode_appends_one_record_per_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let config = workspace(dir.path(), &["b.pdf", "a.pdf", "notes.txt"]).await;

        let total = run_batch(
            &Ui::init_for_tests(),
            &config,
            &RunMode::All,
            &FakeRasterizer::new(2),
            &FakeOcr::default(),
            &FakeExtractor::succeeding(),
        )
        .await
        .unwrap();

        assert_eq!(total, 3);
        assert_eq!(history_filenames(&config).await, ["old.pdf", "a.pdf", "b.pdf"]);
        assert!(config.text_output_path("a").exists());
        assert!(config.text_output_path("b").exists());
        assert!(!config.text_output_path("notes").exists());
    }

    #[tokio::test]
    async fn single_mode_appends_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = workspace(dir.path(), &["invoice1.pdf", "invoice2.pdf"]).await;

        let total = run_batch(
            &Ui::init_for_tests(),
            &config,
            &RunMode::Single("invoice1.pdf".to_owned()),
            &FakeRasterizer::new(3),
            &FakeOcr::default(),
            &FakeExtractor::succeeding(),
        )
        .await
        .unwrap();

        assert_eq!(total, 2);
        assert_eq!(history_filenames(&config).await, ["old.pdf", "invoice1.pdf"]);
        for page in 1..=3 {
            assert!(config.page_image_path("invoice1", page).exists());
        }
        assert!(!config.page_image_path("invoice2", 1).exists());
    }

    #[tokio::test]
    async fn aborted_batch_leaves_history_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let config = workspace(dir.path(), &["a.pdf"]).await;
        let before = tokio::fs::read_to_string(&config.analytics_file)
            .await
            .unwrap();

        let result = run_batch(
            &Ui::init_for_tests(),
            &config,
            &RunMode::All,
            &FakeRasterizer::failing_on_page(2, 2),
            &FakeOcr::default(),
            &FakeExtractor::succeeding(),
        )
        .await;

        assert!(result.is_err());
        let after = tokio::fs::read_to_string(&config.analytics_file)
            .await
            .unwrap();
        assert_eq!(after, before);
    }
}
