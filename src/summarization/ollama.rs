use super::{ChatMessage, ChatRequest, SummarizationClient, SummarizationClientError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// Client for the Ollama `/api/chat` endpoint.
pub struct OllamaSummarizationClient {
    http: Client,
    base_url: String,
}

impl OllamaSummarizationClient {
    /// Wrap an HTTP client pointed at the given Ollama runtime.
    pub fn new(http: Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
    #[serde(default)]
    done: bool,
}

#[async_trait]
impl SummarizationClient for OllamaSummarizationClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, SummarizationClientError> {
        let payload = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
            "options": {
                "temperature": 0.1,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                SummarizationClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizationClientError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404: {body}",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizationClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaChatResponse = response.json().await.map_err(|error| {
            SummarizationClientError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;

        if !body.done {
            return Err(SummarizationClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        let content = body.message.content.trim();
        if content.is_empty() {
            return Err(SummarizationClientError::InvalidResponse(
                "Ollama returned an empty message".into(),
            ));
        }
        Ok(content.to_string())
    }
}
