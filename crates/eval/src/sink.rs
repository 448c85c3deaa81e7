use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::driver::RunMetadata;

/// Score of one (image, model) pair. Written once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub trace_id: Uuid,
    pub run_name: String,
    pub run_description: String,
    pub image_id: String,
    pub model: String,
    pub prompt_name: String,
    pub prompt_version: u32,
    pub expected_output: String,
    pub produced_output: Option<String>,
    pub score: f64,
    pub comment: String,
    /// Whether the produced output parses as the extraction schema.
    pub schema_valid: bool,
    pub latency_ms: u64,
    pub image_fingerprint: Option<String>,
    pub metadata: RunMetadata,
    pub created_at: DateTime<Utc>,
}

/// Destination for score records. Implementations may buffer; `flush` must
/// make everything recorded so far durable.
#[async_trait]
pub trait ResultSink: Send {
    async fn record(&mut self, record: ScoreRecord) -> Result<()>;
    async fn flush(&mut self) -> Result<()>;
}

/// Buffers records and appends them to a JSONL file on flush.
pub struct JsonlSink {
    path: PathBuf,
    buffer: Vec<ScoreRecord>,
    written: usize,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer: Vec::new(),
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Read back every record in a JSONL results file.
    pub async fn read_all(path: &Path) -> Result<Vec<ScoreRecord>> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read results file: {:?}", path))?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).context("Failed to parse score record"))
            .collect()
    }
}

#[async_trait]
impl ResultSink for JsonlSink {
    async fn record(&mut self, record: ScoreRecord) -> Result<()> {
        self.buffer.push(record);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create results directory: {:?}", parent))?;
        }

        let mut lines = String::new();
        for record in &self.buffer {
            lines.push_str(&serde_json::to_string(record).context("Failed to serialize score record")?);
            lines.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open results file: {:?}", self.path))?;
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;

        self.written += self.buffer.len();
        tracing::info!(path = %self.path.display(), records = self.buffer.len(), "flushed score records");
        self.buffer.clear();
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<ScoreRecord>,
    pub flushes: usize,
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn record(&mut self, record: ScoreRecord) -> Result<()> {
        self.records.push(record);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(image_id: &str, score: f64) -> ScoreRecord {
        ScoreRecord {
            trace_id: Uuid::new_v4(),
            run_name: "gpt-4o_eval".to_string(),
            run_description: "Eval gpt-4o".to_string(),
            image_id: image_id.to_string(),
            model: "gpt-4o".to_string(),
            prompt_name: "extractor_system_prompt".to_string(),
            prompt_version: 1,
            expected_output: r#"{"credits": 1.0}"#.to_string(),
            produced_output: Some(r#"{"credits": 1.0}"#.to_string()),
            score,
            comment: "Exact match model=gpt-4o, image=x".to_string(),
            schema_valid: true,
            latency_ms: 10,
            image_fingerprint: None,
            metadata: RunMetadata::default(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_nothing_written_before_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results/scores.jsonl");
        let mut sink = JsonlSink::new(&path);

        sink.record(record("a", 1.0)).await.unwrap();
        assert!(!path.exists());

        sink.flush().await.unwrap();
        let records = JsonlSink::read_all(&path).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].image_id, "a");
    }

    #[tokio::test]
    async fn test_flush_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.jsonl");
        let mut sink = JsonlSink::new(&path);

        sink.record(record("a", 1.0)).await.unwrap();
        sink.flush().await.unwrap();
        sink.record(record("b", 0.5)).await.unwrap();
        sink.flush().await.unwrap();
        // Empty flush is a no-op.
        sink.flush().await.unwrap();

        let records = JsonlSink::read_all(&path).await.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.image_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(sink.written(), 2);
    }
}
