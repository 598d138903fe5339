//! Persistent run history.
//!
//! The history is a single JSON file, `{"records": [...]}`, which is read in
//! full, extended with the current batch, and rewritten in full. Old records
//! are carried as raw JSON so that a rewrite never drops fields written by
//! another version of this tool.

use serde_json::Map;

use crate::{prelude::*, run_record::BatchRun};

/// Contents of the history file.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AnalyticsHistory {
    pub records: Vec<Value>,

    /// Any other top-level keys, preserved verbatim.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl AnalyticsHistory {
    /// Append every record of `batch`, in order.
    pub fn append(&mut self, batch: &BatchRun) -> Result<()> {
        for record in batch.records() {
            let value = serde_json::to_value(record).with_context(|| {
                format!("failed to serialize run record for {}", record.filename)
            })?;
            self.records.push(value);
        }
        Ok(())
    }
}

/// Where the history lives.
#[derive(Clone, Debug)]
pub struct AnalyticsStore {
    path: PathBuf,
}

impl AnalyticsStore {
    /// Create a store for the history file at `path`. Nothing is read yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the history. The file must already exist and hold a history
    /// object; we never create one.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<AnalyticsHistory> {
        let data = tokio::fs::read_to_string(&self.path).await.with_context(|| {
            format!("failed to read analytics history {:?}", self.path.display())
        })?;
        if data.trim().is_empty() {
            return Err(anyhow!(
                "analytics history {:?} is empty; initialize it with {{\"records\": []}}",
                self.path.display()
            ));
        }
        serde_json::from_str(&data).with_context(|| {
            format!("failed to parse analytics history {:?}", self.path.display())
        })
    }

    /// Overwrite the history file.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub async fn save(&self, history: &AnalyticsHistory) -> Result<()> {
        let data = serde_json::to_vec_pretty(history)
            .context("failed to serialize analytics history")?;
        tokio::fs::write(&self.path, data).await.with_context(|| {
            format!("failed to write analytics history {:?}", self.path.display())
        })
    }

    /// Merge `batch` into the stored history. Returns the new record count.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub async fn flush(&self, batch: &BatchRun) -> Result<usize> {
        let mut history = self.load().await?;
        if batch.is_empty() {
            debug!("No new run records, rewriting history unchanged");
        }
        let prior = history.records.len();
        history.append(batch)?;
        self.save(&history).await?;
        info!(
            prior,
            added = batch.len(),
            total = history.records.len(),
            "Saved analytics to {}",
            self.path().display()
        );
        Ok(history.records.len())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pipeline::tests::{FakeExtractor, FakeOcr, FakeRasterizer, run_fake_batch};

    #[tokio::test]
    async fn missing_history_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalyticsStore::new(dir.path().join("analytics.json"));
        let err = store.flush(&BatchRun::new()).await.unwrap_err();
        assert!(err.to_string().contains("failed to read"), "got: {err}");
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn empty_history_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalyticsStore::new(dir.path().join("analytics.json"));
        tokio::fs::write(store.path(), "  \n").await.unwrap();
        let err = store.load().await.unwrap_err();
        assert!(err.to_string().contains("is empty"), "got: {err}");
    }

    #[tokio::test]
    async fn corrupt_history_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalyticsStore::new(dir.path().join("analytics.json"));
        tokio::fs::write(store.path(), "{\"records\": [").await.unwrap();
        assert!(store.load().await.is_err());
    }

    #[tokio::test]
    async fn flush_appends_after_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalyticsStore::new(dir.path().join("analytics.json"));
        let existing = json!({
            "records": [{ "filename": "old", "legacy_field": 1 }],
            "created_by": "ops",
        });
        tokio::fs::write(store.path(), existing.to_string()).await.unwrap();

        let batch = run_fake_batch(
            dir.path(),
            &["a", "b"],
            &FakeRasterizer::new(2),
            &FakeOcr::default(),
            &FakeExtractor::succeeding(),
        )
        .await
        .unwrap();

        assert_eq!(store.flush(&batch).await.unwrap(), 3);

        let history = store.load().await.unwrap();
        let filenames = history
            .records
            .iter()
            .map(|r| r["filename"].as_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(filenames, ["old", "a.pdf", "b.pdf"]);
        assert_eq!(history.records[0]["legacy_field"], 1);
        assert_eq!(history.other["created_by"], "ops");
    }

    #[tokio::test]
    async fn flushing_an_empty_batch_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalyticsStore::new(dir.path().join("analytics.json"));
        tokio::fs::write(store.path(), "{\"records\": []}").await.unwrap();
        assert_eq!(store.flush(&BatchRun::new()).await.unwrap(), 0);
        assert_eq!(store.flush(&BatchRun::new()).await.unwrap(), 0);
    }
}
