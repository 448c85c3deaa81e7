use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{ExtractError, Result};
use crate::llm::Role;
use crate::store::PromptStore;

/// `{{name}}` placeholders, whitespace inside the braces allowed.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A text prompt is a single system template; a chat prompt is an ordered
/// list of role-tagged templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptBody {
    Text(String),
    Chat(Vec<ChatMessage>),
}

/// Versioned prompt as kept by a [`PromptStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDefinition {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub prompt: PromptBody,
    /// Raw configuration: `json_schema`, optional `model`, sampling options.
    #[serde(default)]
    pub config: Map<String, Value>,
}

fn default_version() -> u32 {
    1
}

impl PromptDefinition {
    /// Substitute placeholders in every message template. Placeholders with
    /// no matching argument are left untouched.
    pub fn compile(&self, args: &HashMap<String, String>) -> Vec<ChatMessage> {
        match &self.prompt {
            PromptBody::Text(template) => {
                vec![ChatMessage::new(Role::System, fill_template(template, args))]
            }
            PromptBody::Chat(messages) => messages
                .iter()
                .map(|m| ChatMessage::new(m.role, fill_template(&m.content, args)))
                .collect(),
        }
    }
}

pub fn fill_template(template: &str, args: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match args.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Prompt configuration split into its structural and request-tuning parts.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptConfig {
    pub schema: Value,
    pub model: Option<String>,
    /// Passed through to the request body. Never contains the schema.
    pub sampling_options: Map<String, Value>,
}

impl PromptConfig {
    pub fn from_raw(prompt_name: &str, raw: &Map<String, Value>) -> Result<Self> {
        let mut options = raw.clone();

        let schema = options
            .remove("json_schema")
            .ok_or_else(|| ExtractError::invalid_prompt(prompt_name, "config has no json_schema"))?;

        let model = match options.remove("model") {
            None | Some(Value::Null) => None,
            Some(Value::String(model)) => Some(model),
            Some(other) => {
                return Err(ExtractError::invalid_prompt(
                    prompt_name,
                    format!("model must be a string, got {other}"),
                ));
            }
        };

        Ok(Self {
            schema,
            model,
            sampling_options: options,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPrompt {
    pub name: String,
    pub version: u32,
    pub messages: Vec<ChatMessage>,
    pub config: PromptConfig,
}

impl ResolvedPrompt {
    /// First system message, used as the system prompt in structured mode.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }
}

/// Fetch `name` from the store, split its config and compile its messages.
///
/// Unless the caller passes its own `schema` argument, the config's schema
/// is interpolated as compact JSON.
pub async fn resolve_prompt(
    store: &dyn PromptStore,
    name: &str,
    args: &HashMap<String, String>,
) -> Result<ResolvedPrompt> {
    let definition = store.get_prompt(name).await?;
    let config = PromptConfig::from_raw(&definition.name, &definition.config)?;

    let mut args = args.clone();
    args.entry("schema".to_string())
        .or_insert_with(|| config.schema.to_string());

    let messages = definition.compile(&args);
    tracing::debug!(
        prompt = %definition.name,
        version = definition.version,
        messages = messages.len(),
        "resolved prompt"
    );

    Ok(ResolvedPrompt {
        name: definition.name,
        version: definition.version,
        messages,
        config,
    })
}
