use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ingest::ImageReader;

use crate::error::{ExtractError, Result};
use crate::llm::{ChatRequest, ContentPart, ImageUrl, MessageContent, ModelEndpoint, RequestMessage, Role};
use crate::prompt::{ChatMessage, ResolvedPrompt, resolve_prompt};
use crate::schema::SCHEMA_NAME;
use crate::store::{FREE_FORM_PROMPT, PromptStore, STRUCTURED_PROMPT};

/// How the endpoint is asked for JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// The endpoint enforces the schema at generation time.
    Structured,
    /// The endpoint answers in prose; JSON is scraped from fenced blocks.
    FreeForm,
}

impl ExtractionMode {
    /// OpenAI models support schema-constrained output; everything else is
    /// treated as free-form.
    pub fn for_model(model: &str) -> Self {
        if model.contains("gpt") || model.contains("o1") {
            Self::Structured
        } else {
            Self::FreeForm
        }
    }

    pub fn default_prompt(self) -> &'static str {
        match self {
            Self::Structured => STRUCTURED_PROMPT,
            Self::FreeForm => FREE_FORM_PROMPT,
        }
    }
}

/// Base64 image plus the MIME type used to build its data URL.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub base64: String,
    pub mime: &'static str,
}

impl EncodedImage {
    pub fn png(base64: impl Into<String>) -> Self {
        Self {
            base64: base64.into(),
            mime: "image/png",
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            base64: ImageReader::encode(path).await?,
            mime: ingest::reader::mime_type(path),
        })
    }

    /// Encode bytes already read from `path`; the path only picks the MIME type.
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Self {
        Self {
            base64: ImageReader::encode_bytes(bytes),
            mime: ingest::reader::mime_type(path),
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }

    fn part(&self) -> ContentPart {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: self.data_url(),
            },
        }
    }
}

/// Ask the endpoint for output constrained to `schema`.
///
/// Returns the raw completion text, which the caller may treat as
/// schema-conformant JSON. Transport and HTTP failures surface as
/// [`ExtractError::Invocation`]; nothing is retried here.
pub async fn extract_structured(
    endpoint: &dyn ModelEndpoint,
    image: &EncodedImage,
    system_prompt: &str,
    schema: &Value,
    model: &str,
    options: &Map<String, Value>,
) -> Result<String> {
    let messages = vec![
        RequestMessage {
            role: Role::System,
            content: MessageContent::Text(system_prompt.to_string()),
        },
        RequestMessage {
            role: Role::User,
            content: MessageContent::Parts(vec![image.part()]),
        },
    ];

    let request = ChatRequest::new(model, messages)
        .with_json_schema(SCHEMA_NAME, schema.clone())
        .with_options(options);

    tracing::debug!(model = %model, "sending structured extraction request");
    endpoint.complete(&request).await
}

/// Ask the endpoint for a free-form answer.
///
/// `model_override` wins over the prompt's configured model; with neither,
/// this fails with [`ExtractError::Configuration`] before any request is
/// made. The last user message becomes a multipart message: its text
/// followed by the image.
pub async fn extract_free_form(
    endpoint: &dyn ModelEndpoint,
    image: &EncodedImage,
    messages: &[ChatMessage],
    config: &crate::prompt::PromptConfig,
    model_override: Option<&str>,
) -> Result<String> {
    let model = model_override
        .or(config.model.as_deref())
        .ok_or_else(|| {
            ExtractError::Configuration(
                "model name is required in the prompt config or as an argument".to_string(),
            )
        })?;

    let request = ChatRequest::new(model, attach_image(messages, image))
        .with_options(&config.sampling_options);

    tracing::debug!(model = %model, messages = request.messages.len(), "sending free-form extraction request");
    endpoint.complete(&request).await
}

fn attach_image(messages: &[ChatMessage], image: &EncodedImage) -> Vec<RequestMessage> {
    let last_user = messages.iter().rposition(|m| m.role == Role::User);

    let mut request_messages: Vec<RequestMessage> = messages
        .iter()
        .enumerate()
        .map(|(idx, m)| {
            let content = if Some(idx) == last_user {
                MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: m.content.clone(),
                    },
                    image.part(),
                ])
            } else {
                MessageContent::Text(m.content.clone())
            };
            RequestMessage {
                role: m.role,
                content,
            }
        })
        .collect();

    if last_user.is_none() {
        request_messages.push(RequestMessage {
            role: Role::User,
            content: MessageContent::Parts(vec![image.part()]),
        });
    }

    request_messages
}

/// Raw output of one extraction together with what produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub model: String,
    pub mode: ExtractionMode,
    pub prompt_name: String,
    pub prompt_version: u32,
    pub raw_output: String,
}

/// Resolve → encode → invoke, with the prompt store and endpoint injected.
#[derive(Clone)]
pub struct Extractor {
    endpoint: Arc<dyn ModelEndpoint>,
    prompts: Arc<dyn PromptStore>,
}

impl Extractor {
    pub fn new(endpoint: Arc<dyn ModelEndpoint>, prompts: Arc<dyn PromptStore>) -> Self {
        Self { endpoint, prompts }
    }

    pub async fn resolve(&self, prompt_name: &str) -> Result<ResolvedPrompt> {
        resolve_prompt(self.prompts.as_ref(), prompt_name, &HashMap::new()).await
    }

    /// Extract the account-value table from the image at `image_path`.
    pub async fn extract(
        &self,
        image_path: &Path,
        prompt_name: &str,
        model: Option<&str>,
        mode: ExtractionMode,
    ) -> Result<Extraction> {
        let prompt = self.resolve(prompt_name).await?;
        self.extract_with_prompt(image_path, &prompt, model, mode).await
    }

    pub async fn extract_with_prompt(
        &self,
        image_path: &Path,
        prompt: &ResolvedPrompt,
        model: Option<&str>,
        mode: ExtractionMode,
    ) -> Result<Extraction> {
        let image = EncodedImage::load(image_path).await?;
        self.extract_image(&image, prompt, model, mode).await
    }

    /// Same as [`Extractor::extract_with_prompt`] for an image that is
    /// already encoded.
    pub async fn extract_image(
        &self,
        image: &EncodedImage,
        prompt: &ResolvedPrompt,
        model: Option<&str>,
        mode: ExtractionMode,
    ) -> Result<Extraction> {
        let (model, raw_output) = match mode {
            ExtractionMode::Structured => {
                let model = model
                    .or(prompt.config.model.as_deref())
                    .ok_or_else(|| {
                        ExtractError::Configuration(
                            "model name is required for structured extraction".to_string(),
                        )
                    })?;
                let system_prompt = prompt.system_prompt().ok_or_else(|| {
                    ExtractError::invalid_prompt(&prompt.name, "no system message to send")
                })?;

                let output = extract_structured(
                    self.endpoint.as_ref(),
                    image,
                    system_prompt,
                    &prompt.config.schema,
                    model,
                    &prompt.config.sampling_options,
                )
                .await?;
                (model.to_string(), output)
            }
            ExtractionMode::FreeForm => {
                let output = extract_free_form(
                    self.endpoint.as_ref(),
                    image,
                    &prompt.messages,
                    &prompt.config,
                    model,
                )
                .await?;
                let model = model.or(prompt.config.model.as_deref()).unwrap_or_default();
                (model.to_string(), output)
            }
        };

        Ok(Extraction {
            model,
            mode,
            prompt_name: prompt.name.clone(),
            prompt_version: prompt.version,
            raw_output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ResponseFormat;
    use crate::prompt::PromptConfig;
    use crate::store::InMemoryPromptStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingEndpoint {
        reply: String,
        calls: AtomicUsize,
        last: Mutex<Option<ChatRequest>>,
    }

    impl RecordingEndpoint {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            }
        }

        fn last_request(&self) -> ChatRequest {
            self.last.lock().unwrap().clone().unwrap()
        }
    }

    #[async_trait]
    impl ModelEndpoint for RecordingEndpoint {
        async fn complete(&self, request: &ChatRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request.clone());
            Ok(self.reply.clone())
        }
    }

    fn config(model: Option<&str>) -> PromptConfig {
        let mut sampling_options = Map::new();
        sampling_options.insert("temperature".to_string(), json!(0));
        PromptConfig {
            schema: json!({"type": "object"}),
            model: model.map(String::from),
            sampling_options,
        }
    }

    fn chat() -> Vec<ChatMessage> {
        vec![
            ChatMessage::new(Role::System, "system"),
            ChatMessage::new(Role::User, "extract please"),
        ]
    }

    #[test]
    fn test_mode_dispatch_by_model_name() {
        assert_eq!(ExtractionMode::for_model("gpt-4o"), ExtractionMode::Structured);
        assert_eq!(ExtractionMode::for_model("gpt-4o-mini"), ExtractionMode::Structured);
        assert_eq!(ExtractionMode::for_model("o1-preview"), ExtractionMode::Structured);
        assert_eq!(ExtractionMode::for_model("pixtral-12b"), ExtractionMode::FreeForm);
        assert_eq!(ExtractionMode::for_model("qwen2-vl-7b"), ExtractionMode::FreeForm);
    }

    #[tokio::test]
    async fn test_free_form_without_model_fails_before_request() {
        let endpoint = RecordingEndpoint::new("unused");
        let image = EncodedImage::png("AAAA");

        let err = extract_free_form(&endpoint, &image, &chat(), &config(None), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::Configuration(_)));
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_free_form_override_wins_and_image_follows_text() {
        let endpoint = RecordingEndpoint::new("```json\n{}\n```");
        let image = EncodedImage::png("AAAA");

        let output = extract_free_form(
            &endpoint,
            &image,
            &chat(),
            &config(Some("qwen2-vl-7b")),
            Some("pixtral-12b"),
        )
        .await
        .unwrap();
        assert_eq!(output, "```json\n{}\n```");

        let request = endpoint.last_request();
        assert_eq!(request.model, "pixtral-12b");
        assert!(request.response_format.is_none());
        assert_eq!(request.options["temperature"], json!(0));
        assert_eq!(
            request.messages[1].content,
            MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "extract please".to_string()
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/png;base64,AAAA".to_string()
                    }
                },
            ])
        );
    }

    #[tokio::test]
    async fn test_structured_sends_schema_not_as_option() {
        let endpoint = RecordingEndpoint::new(r#"{"credits": 1.0}"#);
        let image = EncodedImage::png("AAAA");
        let config = config(None);

        let output = extract_structured(
            &endpoint,
            &image,
            "system",
            &config.schema,
            "gpt-4o",
            &config.sampling_options,
        )
        .await
        .unwrap();
        assert_eq!(output, r#"{"credits": 1.0}"#);

        let request = endpoint.last_request();
        assert_eq!(request.model, "gpt-4o");
        assert!(!request.options.contains_key("json_schema"));
        match request.response_format {
            Some(ResponseFormat::JsonSchema { json_schema }) => {
                assert_eq!(json_schema.name, "change_in_account_value");
                assert_eq!(json_schema.schema, json!({"type": "object"}));
            }
            None => panic!("structured request must carry a response format"),
        }
    }

    #[tokio::test]
    async fn test_extractor_end_to_end_with_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("fidelity.png");
        std::fs::write(&image_path, b"png").unwrap();

        let endpoint = Arc::new(RecordingEndpoint::new("```json\n{\"credits\": 2}\n```"));
        let extractor = Extractor::new(endpoint.clone(), Arc::new(InMemoryPromptStore::with_builtins()));

        let extraction = extractor
            .extract(&image_path, FREE_FORM_PROMPT, None, ExtractionMode::FreeForm)
            .await
            .unwrap();

        assert_eq!(extraction.model, "qwen2-vl-7b");
        assert_eq!(extraction.prompt_version, 1);
        let request = endpoint.last_request();
        assert!(!serde_json::to_value(&request).unwrap().as_object().unwrap().contains_key("json_schema"));
        match &request.messages[1].content {
            MessageContent::Parts(parts) => match &parts[0] {
                ContentPart::Text { text } => assert!(text.contains("starting_value")),
                other => panic!("unexpected part {other:?}"),
            },
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_extractor_missing_image_is_io_error() {
        let endpoint = Arc::new(RecordingEndpoint::new("unused"));
        let extractor = Extractor::new(endpoint.clone(), Arc::new(InMemoryPromptStore::with_builtins()));

        let err = extractor
            .extract(Path::new("/missing.png"), STRUCTURED_PROMPT, Some("gpt-4o"), ExtractionMode::Structured)
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractError::Io(_)));
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_encoding_from_bytes_matches_file_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.jpg");
        std::fs::write(&path, b"statement").unwrap();

        let loaded = EncodedImage::load(&path).await.unwrap();
        assert_eq!(EncodedImage::from_bytes(&path, b"statement"), loaded);
        assert_eq!(loaded.mime, "image/jpeg");
    }
}
