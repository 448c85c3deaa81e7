use anyhow::{Context, Result};
use chrono::Utc;
use extract::{
    ChangeInAccountValue, EncodedImage, ExtractError, ExtractionMode, Extractor, first_json_block,
};
use ingest::{Dataset, DatasetItem, ImageReader};
use serde::{Deserialize, Serialize};
use std::process::Command;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ModelSpec;
use crate::report::{ModelSummary, summarize};
use crate::scorer::{MatchPolicy, ScoreError, parse_expected, score_comment, score_with_policy};
use crate::sink::{ResultSink, ScoreRecord};

/// Version information attached to every record of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub app_version: String,
    pub git_commit: Option<String>,
}

impl RunMetadata {
    pub fn collect() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            git_commit: git_commit_hash(),
        }
    }
}

fn git_commit_hash() -> Option<String> {
    let output = Command::new("git").args(["rev-parse", "HEAD"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!hash.is_empty()).then_some(hash)
}

/// Why a single (image, model) pair produced no record.
#[derive(Debug, Error)]
enum PairError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Score(#[from] ScoreError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairFailure {
    pub image_id: String,
    pub model: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub dataset: String,
    pub records_written: usize,
    pub failures: Vec<PairFailure>,
    pub summaries: Vec<ModelSummary>,
}

/// Scores every (dataset item, model) pair, one at a time.
pub struct RunDriver {
    extractor: Extractor,
    models: Vec<ModelSpec>,
    policy: MatchPolicy,
    metadata: RunMetadata,
}

impl RunDriver {
    pub fn new(extractor: Extractor, models: Vec<ModelSpec>, policy: MatchPolicy) -> Self {
        Self {
            extractor,
            models,
            policy,
            metadata: RunMetadata::collect(),
        }
    }

    pub fn with_metadata(mut self, metadata: RunMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Run the evaluation and flush the sink.
    ///
    /// Extraction failures are logged and skipped. A malformed expected
    /// output aborts the run, after flushing what was recorded so far.
    pub async fn run(&self, dataset: &Dataset, sink: &mut dyn ResultSink) -> Result<RunReport> {
        info!(
            dataset = %dataset.name,
            items = dataset.len(),
            models = self.models.len(),
            "starting evaluation run"
        );

        let mut records = Vec::new();
        let mut failures = Vec::new();

        for item in &dataset.items {
            if let Err(e) = parse_expected(&item.expected_output) {
                self.flush_after_abort(sink).await;
                return Err(e).with_context(|| {
                    format!("Corrupt expected output for item '{}'", item.id)
                });
            }

            let bytes = match ImageReader::read_bytes(&item.image_path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    let e = ExtractError::from(e);
                    for model in &self.models {
                        push_failure(&mut failures, item, model, &e);
                    }
                    continue;
                }
            };
            let fingerprint = ingest::image_fingerprint(&bytes);
            let image = EncodedImage::from_bytes(&item.image_path, &bytes);

            for model in &self.models {
                match self.evaluate(item, &image, model, &fingerprint).await {
                    Ok(record) => {
                        info!(
                            image = %record.image_id,
                            model = %record.model,
                            score = record.score,
                            "scored"
                        );
                        if let Err(e) = sink.record(record.clone()).await {
                            self.flush_after_abort(sink).await;
                            return Err(e.context("Failed to record score"));
                        }
                        records.push(record);
                    }
                    Err(PairError::Extract(e)) => push_failure(&mut failures, item, model, &e),
                    Err(PairError::Score(e)) => {
                        self.flush_after_abort(sink).await;
                        return Err(e).with_context(|| {
                            format!("Corrupt expected output for item '{}'", item.id)
                        });
                    }
                }
            }
        }

        sink.flush().await.context("Failed to flush score records")?;

        let summaries = self
            .models
            .iter()
            .map(|m| summarize(&m.name, &records, &failures))
            .collect();

        info!(records = records.len(), failures = failures.len(), "evaluation run finished");

        Ok(RunReport {
            dataset: dataset.name.clone(),
            records_written: records.len(),
            failures,
            summaries,
        })
    }

    async fn flush_after_abort(&self, sink: &mut dyn ResultSink) {
        if let Err(e) = sink.flush().await {
            warn!(error = %e, "failed to flush score records while aborting");
        }
    }

    async fn evaluate(
        &self,
        item: &DatasetItem,
        image: &EncodedImage,
        model: &ModelSpec,
        image_fingerprint: &str,
    ) -> std::result::Result<ScoreRecord, PairError> {
        let mode = model.mode();
        let start = Instant::now();

        let prompt = self.extractor.resolve(model.prompt_name()).await?;
        let extraction = self
            .extractor
            .extract_image(image, &prompt, Some(model.name.as_str()), mode)
            .await?;
        let latency_ms = start.elapsed().as_millis() as u64;

        let candidate = match mode {
            ExtractionMode::Structured => Some(extraction.raw_output.clone()),
            ExtractionMode::FreeForm => first_json_block(&extraction.raw_output),
        };

        let mut comment = score_comment(&model.name, &item.id);
        let score = match &candidate {
            Some(candidate) => score_with_policy(candidate, &item.expected_output, &self.policy)?,
            None => {
                comment.push_str(" (no JSON block in output)");
                0.0
            }
        };

        let schema_valid = candidate
            .as_deref()
            .and_then(ChangeInAccountValue::parse)
            .is_some();

        Ok(ScoreRecord {
            trace_id: Uuid::new_v4(),
            run_name: format!("{}_eval", model.name),
            run_description: format!("Eval {}", model.name),
            image_id: item.id.clone(),
            model: model.name.clone(),
            prompt_name: extraction.prompt_name,
            prompt_version: extraction.prompt_version,
            expected_output: item.expected_output.clone(),
            produced_output: candidate,
            score,
            comment,
            schema_valid,
            latency_ms,
            image_fingerprint: Some(image_fingerprint.to_string()),
            metadata: self.metadata.clone(),
            created_at: Utc::now(),
        })
    }
}

fn push_failure(failures: &mut Vec<PairFailure>, item: &DatasetItem, model: &ModelSpec, error: &ExtractError) {
    warn!(image = %item.id, model = %model.name, error = %error, "extraction failed, skipping");
    failures.push(PairFailure {
        image_id: item.id.clone(),
        model: model.name.clone(),
        error: error.to_string(),
    });
}
