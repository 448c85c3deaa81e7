use anyhow::{Context, Result};
use clap::Parser;
use eval::{AppConfig, JsonlSink, RunDriver, RunReport, generate_plots, write_report};
use extract::{Extractor, FilePromptStore, OpenAiCompatibleClient, RetryPolicy, RetryingEndpoint};
use ingest::Dataset;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Score vision models on brokerage statement extraction.
#[derive(Debug, Parser)]
#[command(name = "run_eval", version)]
struct Args {
    /// TOML configuration file (defaults apply when missing)
    #[arg(long, default_value = "extractor.toml")]
    config: PathBuf,

    /// Dataset of images and expected outputs: a .json or .jsonl file, or a
    /// directory of images with a same-named .json expected output beside each
    #[arg(long)]
    dataset: PathBuf,

    /// Results JSONL file, overriding run.results_path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Only evaluate these models (repeatable)
    #[arg(long = "model")]
    models: Vec<String>,

    /// Skip plot generation
    #[arg(long)]
    no_plots: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(&args.config)?;

    if let Some(output) = &args.output {
        config.run.results_path = output.clone();
    }
    if !args.models.is_empty() {
        config.run.models.retain(|m| args.models.contains(&m.name));
        if config.run.models.is_empty() {
            anyhow::bail!("None of the requested models are configured: {:?}", args.models);
        }
    }

    let prompts = FilePromptStore::new(&config.run.prompts_dir);
    let seeded = prompts
        .seed()
        .await
        .with_context(|| format!("Failed to seed prompts in {:?}", config.run.prompts_dir))?;
    if seeded > 0 {
        tracing::info!(count = seeded, dir = %config.run.prompts_dir.display(), "wrote built-in prompts");
    }

    let client = OpenAiCompatibleClient::new(
        config.endpoint.base_url.clone(),
        config.endpoint.api_key.clone(),
        Duration::from_secs(config.endpoint.request_timeout_secs),
    )?;
    let retry = RetryPolicy::new(
        config.retry.max_retries,
        config.retry.initial_backoff_ms,
        config.retry.max_backoff_ms,
    );
    let extractor = Extractor::new(
        Arc::new(RetryingEndpoint::new(client, retry)),
        Arc::new(prompts),
    );

    let dataset = Dataset::load(&args.dataset)
        .await
        .with_context(|| format!("Failed to load dataset {:?}", args.dataset))?;
    println!("Dataset '{}': {} images\n", dataset.name, dataset.len());

    let driver = RunDriver::new(extractor, config.run.models.clone(), config.scoring);
    let mut sink = JsonlSink::new(&config.run.results_path);
    let report = driver.run(&dataset, &mut sink).await?;

    print_results(&report);
    println!("\nScores appended to {}", sink.path().display());

    let (summary_path, _) = write_report(&report, &config.run.results_path)?;
    println!("Summary saved to {}", summary_path.display());

    if let (Some(dir), false) = (&config.run.plots_dir, args.no_plots) {
        generate_plots(&report.summaries, dir)?;
        println!("Plots saved to {}", dir.display());
    }

    Ok(())
}

fn print_results(report: &RunReport) {
    println!("=== RESULTS ===\n");

    for s in &report.summaries {
        println!("{}:", s.model);
        println!("  Scored: {} (failed: {})", s.scored, s.failed);
        println!("  Avg Score: {:.3}", s.avg_score);
        println!("  Median Score: {:.3}", s.median_score);
        println!("  Perfect Matches: {}", s.perfect_matches);
        println!("  Schema Valid: {}", s.schema_valid);
        println!("  P50 Latency: {:.0} ms", s.p50_latency_ms);
        println!("  P95 Latency: {:.0} ms", s.p95_latency_ms);
    }

    if !report.failures.is_empty() {
        println!("\n{} extraction(s) failed:", report.failures.len());
        for f in &report.failures {
            println!("  {} / {}: {}", f.image_id, f.model, f.error);
        }
    }
}
