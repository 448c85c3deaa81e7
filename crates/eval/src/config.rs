use anyhow::{Context, Result};
use extract::ExtractionMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::scorer::MatchPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub endpoint: EndpointConfig,
    pub retry: RetryConfig,
    pub run: RunConfig,
    pub scoring: MatchPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout_secs: u64,
}

/// Caller-side retry around model calls. Zero retries keeps every item to
/// a single attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub prompts_dir: PathBuf,
    pub results_path: PathBuf,
    pub plots_dir: Option<PathBuf>,
    pub models: Vec<ModelSpec>,
}

/// A model under evaluation. Mode and prompt default from the model name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExtractionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: None,
            prompt: None,
        }
    }

    pub fn mode(&self) -> ExtractionMode {
        self.mode
            .unwrap_or_else(|| ExtractionMode::for_model(&self.name))
    }

    pub fn prompt_name(&self) -> &str {
        self.prompt
            .as_deref()
            .unwrap_or_else(|| self.mode().default_prompt())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            retry: RetryConfig::default(),
            run: RunConfig::default(),
            scoring: MatchPolicy::default(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000".to_string(),
            api_key: "anything".to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            prompts_dir: PathBuf::from("prompts"),
            results_path: PathBuf::from("results/scores.jsonl"),
            plots_dir: Some(PathBuf::from("plots")),
            models: vec![ModelSpec::new("gpt-4o"), ModelSpec::new("pixtral-12b")],
        }
    }
}

impl AppConfig {
    /// Load from a TOML file, falling back to defaults when it does not
    /// exist, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `EXTRACTOR_BASE_URL` (or `LITELLM_HOST`) and `EXTRACTOR_API_KEY`
    /// override the endpoint settings. Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("EXTRACTOR_BASE_URL").or_else(|| non_empty("LITELLM_HOST")) {
            self.endpoint.base_url = url;
        }
        if let Some(key) = non_empty("EXTRACTOR_API_KEY") {
            self.endpoint.api_key = key;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.base_url.trim().is_empty() {
            anyhow::bail!("endpoint.base_url must not be empty");
        }
        if self.run.models.is_empty() {
            anyhow::bail!("run.models must list at least one model");
        }
        if !self.scoring.numeric_tolerance.is_finite() || self.scoring.numeric_tolerance < 0.0 {
            anyhow::bail!(
                "scoring.numeric_tolerance must be a non-negative number, got {}",
                self.scoring.numeric_tolerance
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [endpoint]
            base_url = "http://litellm:4000"

            [[run.models]]
            name = "qwen2-vl-7b"

            [[run.models]]
            name = "claude-3.5-sonnet"
            mode = "structured"
            prompt = "extractor_system_prompt"

            [scoring]
            numeric_tolerance = 0.005
            "#,
        )
        .unwrap();

        assert_eq!(config.endpoint.base_url, "http://litellm:4000");
        assert_eq!(config.endpoint.api_key, "anything");
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.run.models.len(), 2);
        assert_eq!(config.run.models[0].mode(), ExtractionMode::FreeForm);
        assert_eq!(config.run.models[0].prompt_name(), "qwen_extractor_prompt");
        assert_eq!(config.run.models[1].mode(), ExtractionMode::Structured);
        assert_eq!(config.scoring.numeric_tolerance, 0.005);
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LITELLM_HOST", "http://proxy:9000"),
            ("EXTRACTOR_API_KEY", "sk-test"),
        ]);

        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.endpoint.base_url, "http://proxy:9000");
        assert_eq!(config.endpoint.api_key, "sk-test");
    }

    #[test]
    fn test_explicit_base_url_beats_litellm_host() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LITELLM_HOST", "http://proxy:9000"),
            ("EXTRACTOR_BASE_URL", "http://direct:8000"),
            ("EXTRACTOR_API_KEY", "  "),
        ]);

        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.endpoint.base_url, "http://direct:8000");
        assert_eq!(config.endpoint.api_key, "anything");
    }

    #[test]
    fn test_validate_rejects_negative_tolerance() {
        let mut config = AppConfig::default();
        config.scoring.numeric_tolerance = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.run.models.len(), 2);
    }
}
