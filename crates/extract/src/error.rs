use thiserror::Error;

/// Failure classes of a single extraction. The run driver treats every
/// variant as fatal for the current item only.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Io(#[from] ingest::IngestError),

    #[error("prompt not found: {0}")]
    NotFound(String),

    #[error("invalid prompt '{name}': {message}")]
    InvalidPrompt { name: String, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("model invocation failed: {0}")]
    Invocation(String),
}

impl ExtractError {
    /// Only endpoint failures can go away on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Invocation(_))
    }

    pub(crate) fn invalid_prompt(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPrompt {
            name: name.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
