use crate::error::LlmError;
use crate::llm::{ChatClient, ChatRequest};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;

/// Wraps any `ChatClient` and retries transient failures once.
///
/// # Retry policy
/// - At most `max_retries` extra attempts (default 1, per the turn's
///   single-retry error policy)
/// - Back-off: 500 ms, doubled per attempt
/// - Auth errors (401/403) are never retried
/// - Streams are not retried here — the streaming step owns its own
///   recovery, since tokens may already have reached the user
pub struct RetryingChatClient {
    inner:       Arc<dyn ChatClient>,
    max_retries: u32,
}

impl RetryingChatClient {
    pub fn new(inner: Arc<dyn ChatClient>) -> Self {
        Self { inner, max_retries: 1 }
    }

    pub fn with_retries(inner: Arc<dyn ChatClient>, max_retries: u32) -> Self {
        Self { inner, max_retries }
    }
}

#[async_trait]
impl ChatClient for RetryingChatClient {
    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            match self.inner.chat(request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_auth() => {
                    tracing::error!(error = %e, "LLM auth error — not retrying");
                    return Err(e);
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        let wait_ms = 500u64 << attempt;
                        tracing::warn!(
                            attempt = attempt + 1,
                            max     = self.max_retries,
                            wait_ms,
                            error   = %e,
                            "LLM transient error — retrying"
                        );
                        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| LlmError::Network("no attempt made".to_string())))
    }

    fn chat_stream<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxStream<'a, Result<String, LlmError>> {
        self.inner.chat_stream(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockChatClient;

    #[tokio::test]
    async fn retries_once_then_succeeds() {
        let mock = Arc::new(MockChatClient::new(vec![
            Err(LlmError::Network("connection reset".to_string())),
            Ok("recovered".to_string()),
        ]));
        let client = RetryingChatClient::new(mock.clone());
        let req = ChatRequest::new("m", 0.0, "p");

        let out = client.chat(&req).await.unwrap();
        assert_eq!(out, "recovered");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let mock = Arc::new(MockChatClient::new(vec![
            Err(LlmError::Network("down".to_string())),
            Err(LlmError::Network("still down".to_string())),
        ]));
        let client = RetryingChatClient::new(mock.clone());
        let req = ChatRequest::new("m", 0.0, "p");

        assert!(client.chat(&req).await.is_err());
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn auth_errors_fail_immediately() {
        let mock = Arc::new(MockChatClient::new(vec![
            Err(LlmError::Api { status: 401, body: "unauthorized".to_string() }),
            Ok("never reached".to_string()),
        ]));
        let client = RetryingChatClient::new(mock.clone());
        let req = ChatRequest::new("m", 0.0, "p");

        assert!(client.chat(&req).await.is_err());
        assert_eq!(mock.call_count(), 1);
    }
}
