use anyhow::Result;
use plotters::prelude::*;
use std::path::Path;

use crate::report::ModelSummary;

pub fn generate_plots(summaries: &[ModelSummary], output_dir: &Path) -> Result<()> {
    if summaries.is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(output_dir)?;

    plot_scores(summaries, &output_dir.join("score_by_model.png"))?;
    plot_latency(summaries, &output_dir.join("latency_by_model.png"))?;

    Ok(())
}

fn plot_scores(summaries: &[ModelSummary], path: &Path) -> Result<()> {
    let bars: Vec<(&str, f64)> = summaries
        .iter()
        .map(|s| (s.model.as_str(), s.avg_score))
        .collect();
    draw_bars(path, "Average Exact-Match Score", "Score", &bars, 1.0, &BLUE)
}

fn plot_latency(summaries: &[ModelSummary], path: &Path) -> Result<()> {
    let bars: Vec<(&str, f64)> = summaries
        .iter()
        .map(|s| (s.model.as_str(), s.avg_latency_ms))
        .collect();
    let max_latency = bars.iter().map(|(_, l)| *l).fold(0.0f64, f64::max);
    draw_bars(
        path,
        "Average Extraction Latency (ms)",
        "Latency (ms)",
        &bars,
        (max_latency * 1.2).max(1.0),
        &RED,
    )
}

fn draw_bars(
    path: &Path,
    caption: &str,
    y_desc: &str,
    bars: &[(&str, f64)],
    y_max: f64,
    color: &RGBColor,
) -> Result<()> {
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let labels: Vec<String> = bars.iter().map(|(model, _)| model.to_string()).collect();

    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..bars.len() as f64, 0f64..y_max)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(bars.len() * 2 + 1)
        .x_label_formatter(&|x| {
            let slot = x.floor();
            if (x - slot - 0.5).abs() < 1e-6 {
                labels.get(slot as usize).cloned().unwrap_or_default()
            } else {
                String::new()
            }
        })
        .y_desc(y_desc)
        .draw()?;

    chart.draw_series(bars.iter().enumerate().map(|(i, (_, value))| {
        Rectangle::new(
            [(i as f64 + 0.2, 0.0), (i as f64 + 0.8, *value)],
            color.filled(),
        )
    }))?;

    root.present()?;
    tracing::info!(path = %path.display(), "saved plot");
    Ok(())
}
