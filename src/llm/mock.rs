use crate::error::LlmError;
use crate::llm::{ChatClient, ChatRequest};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Mutex;

/// Programmable chat client for tests. Responses are consumed in order;
/// every call (prompt and model) is recorded for assertions.
pub struct MockChatClient {
    responses: Mutex<Vec<Result<String, LlmError>>>,
    call_log:  Mutex<Vec<(String, String)>>, // (model, prompt)
}

impl MockChatClient {
    pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_log:  Mutex::new(Vec::new()),
        }
    }

    /// Shorthand for a sequence of successful replies.
    pub fn replies(texts: Vec<&str>) -> Self {
        Self::new(texts.into_iter().map(|t| Ok(t.to_string())).collect())
    }

    /// Returns the number of times chat()/chat_stream() was invoked.
    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    /// Returns the prompt passed to the Nth call (0-indexed).
    pub fn prompt_for_call(&self, n: usize) -> Option<String> {
        self.call_log.lock().unwrap().get(n).map(|(_, p)| p.clone())
    }

    fn next_response(&self, request: &ChatRequest) -> Result<String, LlmError> {
        self.call_log
            .lock()
            .unwrap()
            .push((request.model.clone(), request.prompt.clone()));

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LlmError::Network(
                "MockChatClient: no more programmed responses".to_string(),
            ));
        }
        responses.remove(0)
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError> {
        self.next_response(request)
    }

    fn chat_stream<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxStream<'a, Result<String, LlmError>> {
        // Stream the programmed reply word by word to exercise token
        // handling in consumers.
        match self.next_response(request) {
            Ok(text) => {
                let chunks: Vec<Result<String, LlmError>> = text
                    .split_inclusive(' ')
                    .map(|w| Ok(w.to_string()))
                    .collect();
                futures::stream::iter(chunks).boxed()
            }
            Err(e) => futures::stream::once(async move { Err(e) }).boxed(),
        }
    }
}
