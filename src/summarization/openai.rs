use super::{ChatRequest, SummarizationClient, SummarizationClientError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiSummarizationClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiSummarizationClient {
    /// Wrap an HTTP client pointed at the given API base (e.g. `https://api.openai.com/v1`).
    pub fn new(http: Client, base_url: String, api_key: String) -> Self {
        Self {
            http,
            base_url,
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl SummarizationClient for OpenAiSummarizationClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, SummarizationClientError> {
        let payload = json!({
            "model": request.model,
            "messages": request.messages,
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                SummarizationClientError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizationClientError::GenerationFailed(format!(
                "chat completions returned {status}: {body}"
            )));
        }

        let body: CompletionResponse = response.json().await.map_err(|error| {
            SummarizationClientError::InvalidResponse(format!(
                "failed to decode chat completion: {error}"
            ))
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| {
                SummarizationClientError::InvalidResponse(
                    "chat completion carried no message content".into(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarization::StageSettings;
    use httpmock::{Method::POST, MockServer};

    fn client_for(server: &MockServer) -> OpenAiSummarizationClient {
        OpenAiSummarizationClient::new(
            Client::builder()
                .user_agent("medcompress-test")
                .build()
                .expect("client"),
            format!("{}/v1", server.base_url()),
            "sk-test".into(),
        )
    }

    #[tokio::test]
    async fn openai_client_sends_bearer_token_and_reads_first_choice() {
        let server = MockServer::start_async().await;
        let client = client_for(&server);

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .body_contains("gpt-3.5-turbo");
                then.status(200).json_body(json!({
                    "choices": [
                        { "index": 0, "message": { "role": "assistant", "content": "Condensed" } }
                    ]
                }));
            })
            .await;

        let summary = client
            .complete(StageSettings::new("gpt-3.5-turbo", "Summarize.").request_for("Long text"))
            .await
            .expect("summary");

        mock.assert_async().await;
        assert_eq!(summary, "Condensed");
    }

    #[tokio::test]
    async fn openai_client_treats_missing_choices_as_invalid() {
        let server = MockServer::start_async().await;
        let client = client_for(&server);

        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let error = client
            .complete(StageSettings::new("gpt-3.5-turbo", "Summarize.").request_for("x"))
            .await
            .expect_err("empty choices");

        assert!(matches!(error, SummarizationClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn openai_client_surfaces_rate_limits_as_generation_failures() {
        let server = MockServer::start_async().await;
        let client = client_for(&server);

        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(429).body("slow down");
            })
            .await;

        let error = client
            .complete(StageSettings::new("gpt-3.5-turbo", "Summarize.").request_for("x"))
            .await
            .expect_err("rate limited");

        assert!(
            matches!(error, SummarizationClientError::GenerationFailed(ref message) if message.contains("429"))
        );
    }
}
