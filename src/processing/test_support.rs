//! Scripted backend used by reducer and worker tests.

use crate::summarization::{ChatRequest, SummarizationClient, SummarizationClientError};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

type Responder = Box<dyn Fn(&ChatRequest) -> Result<String, SummarizationClientError> + Send + Sync>;
type Delay = Box<dyn Fn(&ChatRequest) -> Duration + Send + Sync>;

/// Backend whose replies come from a closure; every request is recorded.
pub(crate) struct ScriptedClient {
    respond: Responder,
    delay: Delay,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    pub(crate) fn new<F>(respond: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<String, SummarizationClientError> + Send + Sync + 'static,
    {
        Self::with_delay(respond, |_| Duration::ZERO)
    }

    pub(crate) fn with_delay<F, D>(respond: F, delay: D) -> Self
    where
        F: Fn(&ChatRequest) -> Result<String, SummarizationClientError> + Send + Sync + 'static,
        D: Fn(&ChatRequest) -> Duration + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            delay: Box::new(delay),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replies `S(<user text>)`.
    pub(crate) fn echo() -> Self {
        Self::new(|request| Ok(format!("S({})", request.messages[1].content)))
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

#[async_trait]
impl SummarizationClient for ScriptedClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, SummarizationClientError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let delay = (self.delay)(&request);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.respond)(&request)
    }
}
