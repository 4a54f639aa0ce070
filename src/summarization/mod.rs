//! Chat-style text-generation backends used to summarize document text.
//!
//! Every backend accepts an ordered list of role-tagged messages and returns the generated
//! text. The map and final stages of the reducer are the same call with a different
//! [`StageSettings`]; [`RetryingSummarizer`] adds the fixed-delay retry policy on top of
//! whichever client is configured.

mod ollama;
mod openai;
mod retry;

use crate::config::{Config, SummarizationProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use ollama::OllamaSummarizationClient;
pub use openai::OpenAiSummarizationClient;
pub use retry::{RetryPolicy, RetryingSummarizer};

/// Errors surfaced by a single backend request.
#[derive(Debug, Error)]
pub enum SummarizationClientError {
    /// Backend could not be reached or the request timed out.
    #[error("Summarization provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Backend answered with an error status.
    #[error("Failed to generate summary: {0}")]
    GenerationFailed(String),
    /// Backend response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Role attached to a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instruction framing the task.
    System,
    /// Payload to operate on.
    User,
    /// Generated reply.
    Assistant,
}

impl ChatRole {
    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role-tagged message of a backend request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role.
    pub role: ChatRole,
    /// Message body, forwarded verbatim.
    pub content: String,
}

impl ChatMessage {
    /// Build a system-role message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Build a user-role message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Request payload passed to a backend.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier understood by the backend.
    pub model: String,
    /// Ordered conversation, system instruction first.
    pub messages: Vec<ChatMessage>,
}

/// Model and instruction used by one stage of the reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSettings {
    /// Model identifier for the stage.
    pub model: String,
    /// System instruction sent ahead of the text.
    pub instruction: String,
}

impl StageSettings {
    /// Build stage settings from a model and an instruction.
    pub fn new(model: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instruction: instruction.into(),
        }
    }

    /// Compose the request that summarizes `text` under this stage.
    pub fn request_for(&self, text: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(self.instruction.clone()),
                ChatMessage::user(text),
            ],
        }
    }
}

/// Interface implemented by text-generation backends.
#[async_trait]
pub trait SummarizationClient: Send + Sync {
    /// Issue one request and return the generated text.
    async fn complete(&self, request: ChatRequest) -> Result<String, SummarizationClientError>;
}

/// Build the backend client selected by configuration.
pub fn build_summarization_client(
    config: &Config,
) -> Result<Arc<dyn SummarizationClient>, SummarizationClientError> {
    let http = build_http_client(config.request_timeout())?;
    let client: Arc<dyn SummarizationClient> = match config.summarization_provider {
        SummarizationProvider::Ollama => Arc::new(OllamaSummarizationClient::new(
            http,
            config.ollama_url.clone(),
        )),
        SummarizationProvider::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                SummarizationClientError::ProviderUnavailable("OPENAI_API_KEY is not set".into())
            })?;
            Arc::new(OpenAiSummarizationClient::new(
                http,
                config.openai_base_url.clone(),
                api_key,
            ))
        }
    };
    tracing::debug!(provider = ?config.summarization_provider, "Summarization client ready");
    Ok(client)
}

fn build_http_client(timeout: Duration) -> Result<Client, SummarizationClientError> {
    Client::builder()
        .user_agent(concat!("medcompress/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|error| {
            SummarizationClientError::ProviderUnavailable(format!(
                "failed to construct HTTP client: {error}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_request_puts_instruction_before_text() {
        let stage = StageSettings::new("gemma:2b", "Summarize.");
        let request = stage.request_for("Body text");
        assert_eq!(request.model, "gemma:2b");
        assert_eq!(
            request.messages,
            vec![ChatMessage::system("Summarize."), ChatMessage::user("Body text")]
        );
    }

    #[test]
    fn roles_serialize_lowercase() {
        let encoded = serde_json::to_value(ChatMessage::system("x")).expect("serialize");
        assert_eq!(encoded["role"], "system");
    }
}
