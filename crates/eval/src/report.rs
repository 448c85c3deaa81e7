use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::driver::{PairFailure, RunReport};
use crate::sink::ScoreRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub model: String,
    pub scored: usize,
    pub failed: usize,
    pub avg_score: f64,
    pub median_score: f64,
    pub perfect_matches: usize,
    pub schema_valid: usize,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
}

/// Aggregate the records and failures belonging to `model`.
pub fn summarize(model: &str, records: &[ScoreRecord], failures: &[PairFailure]) -> ModelSummary {
    let own: Vec<&ScoreRecord> = records.iter().filter(|r| r.model == model).collect();
    let failed = failures.iter().filter(|f| f.model == model).count();

    let scores: Vec<f64> = own.iter().map(|r| r.score).collect();
    let mut latencies: Vec<f64> = own.iter().map(|r| r.latency_ms as f64).collect();
    latencies.sort_by(f64::total_cmp);

    let (avg_score, median_score) = if scores.is_empty() {
        (0.0, 0.0)
    } else {
        (statistical::mean(&scores), statistical::median(&scores))
    };

    let avg_latency_ms = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<f64>() / latencies.len() as f64
    };

    ModelSummary {
        model: model.to_string(),
        scored: own.len(),
        failed,
        avg_score,
        median_score,
        perfect_matches: scores.iter().filter(|s| **s >= 1.0).count(),
        schema_valid: own.iter().filter(|r| r.schema_valid).count(),
        avg_latency_ms,
        p50_latency_ms: percentile(&latencies, 50),
        p95_latency_ms: percentile(&latencies, 95),
    }
}

fn percentile(sorted_data: &[f64], p: usize) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }
    let index = (p as f64 / 100.0 * sorted_data.len() as f64) as usize;
    sorted_data[index.min(sorted_data.len() - 1)]
}

/// Markdown table of a finished run.
pub fn render_markdown(report: &RunReport) -> String {
    let mut out = format!(
        "# Extraction Results: {}\n\n\
         | Model | Scored | Failed | Avg Score | Median | Perfect | Schema Valid | P50 Latency | P95 Latency |\n\
         |-------|--------|--------|-----------|--------|---------|--------------|-------------|-------------|\n",
        report.dataset
    );

    for s in &report.summaries {
        out.push_str(&format!(
            "| {} | {} | {} | {:.3} | {:.3} | {} | {} | {:.0} ms | {:.0} ms |\n",
            s.model,
            s.scored,
            s.failed,
            s.avg_score,
            s.median_score,
            s.perfect_matches,
            s.schema_valid,
            s.p50_latency_ms,
            s.p95_latency_ms,
        ));
    }

    if !report.failures.is_empty() {
        out.push_str("\n## Failures\n\n");
        for f in &report.failures {
            out.push_str(&format!("- `{}` / `{}`: {}\n", f.image_id, f.model, f.error));
        }
    }

    out
}

/// Write `<results>.summary.json` and `<results>.md` next to the results
/// file, creating its directory if no record was ever flushed there.
pub fn write_report(report: &RunReport, results_path: &Path) -> Result<(PathBuf, PathBuf)> {
    if let Some(parent) = results_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create results directory: {:?}", parent))?;
    }

    let summary_path = results_path.with_extension("summary.json");
    std::fs::write(&summary_path, serde_json::to_string_pretty(report)?)
        .with_context(|| format!("Failed to write summary {:?}", summary_path))?;

    let markdown_path = results_path.with_extension("md");
    std::fs::write(&markdown_path, render_markdown(report))
        .with_context(|| format!("Failed to write report {:?}", markdown_path))?;

    Ok((summary_path, markdown_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RunMetadata;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(model: &str, score: f64, latency_ms: u64) -> ScoreRecord {
        ScoreRecord {
            trace_id: Uuid::new_v4(),
            run_name: format!("{model}_eval"),
            run_description: format!("Eval {model}"),
            image_id: "img".to_string(),
            model: model.to_string(),
            prompt_name: "extractor_system_prompt".to_string(),
            prompt_version: 1,
            expected_output: "{}".to_string(),
            produced_output: None,
            score,
            comment: String::new(),
            schema_valid: score > 0.0,
            latency_ms,
            image_fingerprint: None,
            metadata: RunMetadata::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_summary_filters_by_model() {
        let records = vec![
            record("gpt-4o", 1.0, 100),
            record("gpt-4o", 0.5, 300),
            record("gpt-4o", 0.0, 200),
            record("pixtral-12b", 1.0, 50),
        ];
        let failures = vec![PairFailure {
            image_id: "x".to_string(),
            model: "gpt-4o".to_string(),
            error: "timeout".to_string(),
        }];

        let summary = summarize("gpt-4o", &records, &failures);
        assert_eq!(summary.scored, 3);
        assert_eq!(summary.failed, 1);
        assert!((summary.avg_score - 0.5).abs() < 1e-12);
        assert_eq!(summary.median_score, 0.5);
        assert_eq!(summary.perfect_matches, 1);
        assert_eq!(summary.schema_valid, 2);
        assert_eq!(summary.avg_latency_ms, 200.0);
        assert_eq!(summary.p50_latency_ms, 200.0);
        assert_eq!(summary.p95_latency_ms, 300.0);
    }

    #[test]
    fn test_summary_of_model_without_records() {
        let summary = summarize("qwen2-vl-7b", &[], &[]);
        assert_eq!(summary.scored, 0);
        assert_eq!(summary.avg_score, 0.0);
        assert_eq!(summary.p95_latency_ms, 0.0);
    }

    #[test]
    fn test_markdown_lists_models_and_failures() {
        let report = RunReport {
            dataset: "statements".to_string(),
            records_written: 1,
            failures: vec![PairFailure {
                image_id: "schwab".to_string(),
                model: "pixtral-12b".to_string(),
                error: "model invocation failed".to_string(),
            }],
            summaries: vec![summarize("gpt-4o", &[record("gpt-4o", 1.0, 10)], &[])],
        };

        let md = render_markdown(&report);
        assert!(md.starts_with("# Extraction Results: statements"));
        assert!(md.contains("| gpt-4o | 1 | 0 | 1.000 |"));
        assert!(md.contains("- `schwab` / `pixtral-12b`: model invocation failed"));
    }

    #[test]
    fn test_write_report_creates_results_dir() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results/scores.jsonl");
        let report = RunReport {
            dataset: "statements".to_string(),
            records_written: 0,
            failures: vec![],
            summaries: vec![],
        };

        let (summary, markdown) = write_report(&report, &results).unwrap();
        assert_eq!(summary, dir.path().join("results/scores.summary.json"));
        assert!(summary.exists());
        assert!(markdown.exists());
    }
}
