use super::{StageSettings, SummarizationClient};
use std::sync::Arc;
use std::time::Duration;

/// Fixed attempt cap and inter-attempt delay for backend requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per request, including the first one. Never below 1.
    pub max_attempts: u32,
    /// Pause between two consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Build a policy, clamping the attempt count to at least one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

/// Summarizer that absorbs transient backend failures.
///
/// Errors never cross this boundary: after the last failed attempt the caller receives `None`
/// and treats the text's contribution as absent.
#[derive(Clone)]
pub struct RetryingSummarizer {
    client: Arc<dyn SummarizationClient>,
    policy: RetryPolicy,
}

impl RetryingSummarizer {
    /// Wrap a backend client with the given policy.
    pub fn new(client: Arc<dyn SummarizationClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Summarize `text` under `stage`, forwarding the text unchanged.
    pub async fn summarize(&self, stage: &StageSettings, text: &str) -> Option<String> {
        let max_attempts = self.policy.max_attempts;
        for attempt in 1..=max_attempts {
            match self.client.complete(stage.request_for(text)).await {
                Ok(summary) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, model = %stage.model, "Backend request recovered");
                    }
                    return Some(summary);
                }
                Err(error) => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        model = %stage.model,
                        error = %error,
                        "Backend request failed"
                    );
                    if attempt < max_attempts && !self.policy.delay.is_zero() {
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }

        tracing::error!(
            max_attempts,
            model = %stage.model,
            chars = text.chars().count(),
            "All backend attempts failed"
        );
        None
    }
}
