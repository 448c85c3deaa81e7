use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{ExtractError, Result};
use crate::llm::Role;
use crate::prompt::{ChatMessage, PromptBody, PromptDefinition};
use crate::schema::ChangeInAccountValue;

pub const STRUCTURED_PROMPT: &str = "extractor_system_prompt";
pub const FREE_FORM_PROMPT: &str = "qwen_extractor_prompt";

const SYSTEM_INSTRUCTIONS: &str = "You are an assistant in charge of looking at brokerage account statements for your clients.
You will be provided with an image of the account statement. Please carefully look through the provided account statement and extract the relevant information.";

/// Read-only source of prompt definitions.
#[async_trait]
pub trait PromptStore: Send + Sync {
    async fn get_prompt(&self, name: &str) -> Result<PromptDefinition>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPromptStore {
    prompts: HashMap<String, PromptDefinition>,
}

impl InMemoryPromptStore {
    pub fn new(prompts: impl IntoIterator<Item = PromptDefinition>) -> Self {
        let mut store = Self::default();
        for prompt in prompts {
            store.insert(prompt);
        }
        store
    }

    /// Store seeded with [`builtin_prompts`].
    pub fn with_builtins() -> Self {
        Self::new(builtin_prompts())
    }

    /// Add or replace a definition, keyed by its name.
    pub fn insert(&mut self, prompt: PromptDefinition) {
        self.prompts.insert(prompt.name.clone(), prompt);
    }
}

#[async_trait]
impl PromptStore for InMemoryPromptStore {
    async fn get_prompt(&self, name: &str) -> Result<PromptDefinition> {
        self.prompts
            .get(name)
            .cloned()
            .ok_or_else(|| ExtractError::NotFound(name.to_string()))
    }
}

/// Prompts kept as `<dir>/<name>.json` files.
#[derive(Debug, Clone)]
pub struct FilePromptStore {
    dir: PathBuf,
}

impl FilePromptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the builtin prompts into the directory, leaving existing files alone.
    pub async fn seed(&self) -> Result<usize> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ingest::IngestError::io(&self.dir, e))?;

        let mut written = 0;
        for prompt in builtin_prompts() {
            let path = self.path_for(&prompt.name);
            if fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }

            let json = serde_json::to_string_pretty(&prompt)
                .map_err(|e| ExtractError::invalid_prompt(&prompt.name, e.to_string()))?;
            fs::write(&path, json)
                .await
                .map_err(|e| ingest::IngestError::io(&path, e))?;

            tracing::info!(prompt = %prompt.name, path = %path.display(), "seeded prompt");
            written += 1;
        }

        Ok(written)
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl PromptStore for FilePromptStore {
    async fn get_prompt(&self, name: &str) -> Result<PromptDefinition> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(ExtractError::NotFound(name.to_string()));
        }

        let path = self.path_for(name);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExtractError::NotFound(name.to_string()));
            }
            Err(e) => return Err(ingest::IngestError::io(&path, e).into()),
        };

        let mut definition: PromptDefinition = serde_json::from_str(&content)
            .map_err(|e| ExtractError::invalid_prompt(name, e.to_string()))?;

        // The file name is authoritative.
        if definition.name != name {
            tracing::warn!(file = name, declared = %definition.name, "prompt name differs from file name");
            definition.name = name.to_string();
        }

        Ok(definition)
    }
}

/// The two stock prompts: a text prompt for schema-constrained endpoints and
/// a chat prompt that asks free-form endpoints to follow the schema.
pub fn builtin_prompts() -> Vec<PromptDefinition> {
    let schema = ChangeInAccountValue::json_schema();

    let structured = PromptDefinition {
        name: STRUCTURED_PROMPT.to_string(),
        version: 1,
        prompt: PromptBody::Text(format!(
            "{SYSTEM_INSTRUCTIONS}\nIf a field is not present in the statement, you can leave it as null."
        )),
        config: config_with_schema(&schema, None),
    };

    let free_form = PromptDefinition {
        name: FREE_FORM_PROMPT.to_string(),
        version: 1,
        prompt: PromptBody::Chat(vec![
            ChatMessage::new(
                Role::System,
                format!(
                    "{SYSTEM_INSTRUCTIONS}\nYou should follow the format provided in the schema. If a field is not present in the statement, you can leave it as null.\nReturn the extracted values as a JSON object inside a ```json code block."
                ),
            ),
            ChatMessage::new(
                Role::User,
                "Here is the account statement image. Please extract the following information: {{schema}}",
            ),
        ]),
        config: config_with_schema(&schema, Some("qwen2-vl-7b")),
    };

    vec![structured, free_form]
}

fn config_with_schema(schema: &Value, model: Option<&str>) -> Map<String, Value> {
    let mut config = Map::new();
    config.insert("json_schema".to_string(), schema.clone());
    if let Some(model) = model {
        config.insert("model".to_string(), Value::String(model.to_string()));
    }
    config
}
