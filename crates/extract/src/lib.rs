//! Prompt resolution, model invocation and JSON scraping for brokerage
//! statement extraction.

pub mod error;
pub mod fence;
pub mod invoker;
pub mod llm;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod store;

pub use error::{ExtractError, Result};
pub use fence::{extract_json_blocks, first_json_block};
pub use invoker::{
    EncodedImage, Extraction, ExtractionMode, Extractor, extract_free_form, extract_structured,
};
pub use llm::{ChatRequest, ModelEndpoint, OpenAiCompatibleClient, Role};
pub use prompt::{ChatMessage, PromptConfig, PromptDefinition, ResolvedPrompt, resolve_prompt};
pub use retry::{RetryPolicy, RetryingEndpoint};
pub use schema::ChangeInAccountValue;
pub use store::{FilePromptStore, InMemoryPromptStore, PromptStore, builtin_prompts};
