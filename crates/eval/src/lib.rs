//! Scoring and run orchestration for statement extraction evaluations.

pub mod config;
pub mod driver;
pub mod plots;
pub mod report;
pub mod scorer;
pub mod sink;

pub use config::{AppConfig, ModelSpec};
pub use driver::{PairFailure, RunDriver, RunMetadata, RunReport};
pub use plots::generate_plots;
pub use report::{ModelSummary, render_markdown, summarize, write_report};
pub use scorer::{MatchPolicy, ScoreError, exact_match_score, score_comment, score_with_policy};
pub use sink::{JsonlSink, MemorySink, ResultSink, ScoreRecord};
