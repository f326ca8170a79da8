use crate::error::LlmError;
use crate::llm::{ChatClient, ChatRequest, CHAT_TIMEOUT_SECS};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;

// ── Request / response types (OpenAI-compatible chat endpoint) ──────────

#[derive(serde::Serialize)]
struct CompletionRequest {
    model:       String,
    temperature: f32,
    messages:    Vec<Message>,
    stream:      bool,
}

#[derive(serde::Serialize)]
struct Message {
    role:    String,
    content: String,
}

#[derive(serde::Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(serde::Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(serde::Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(serde::Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(serde::Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(serde::Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

// ── Client ──────────────────────────────────────────────────────────────

/// Chat client for an Ollama instance (or any other endpoint speaking the
/// OpenAI-compatible `/v1/chat/completions` protocol).
pub struct OllamaChatClient {
    client:   reqwest::Client,
    api_base: String,
}

impl OllamaChatClient {
    /// `api_base` example: "http://localhost:11434/v1"
    pub fn new(api_base: impl Into<String>) -> Self {
        let api_base = {
            let s: String = api_base.into();
            if s.is_empty() { "http://localhost:11434/v1".to_string() } else { s }
        };
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(CHAT_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            api_base,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    fn body(request: &ChatRequest, stream: bool) -> CompletionRequest {
        CompletionRequest {
            model:       request.model.clone(),
            temperature: request.temperature,
            messages:    vec![Message {
                role:    "user".to_string(),
                content: request.prompt.clone(),
            }],
            stream,
        }
    }
}


#[async_trait]
impl ChatClient for OllamaChatClient {
    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let response = self.client
            .post(self.endpoint())
            .json(&Self::body(request, false))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(CHAT_TIMEOUT_SECS)
                } else {
                    LlmError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status: status.as_u16(), body });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        parsed.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Malformed("empty completion".to_string()))
    }

    fn chat_stream<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxStream<'a, Result<String, LlmError>> {
        let body = Self::body(request, true);
        // No total timeout on streaming — the idle cap between tokens is
        // enforced by the consumer.
        let builder = reqwest::Client::new()
            .post(self.endpoint())
            .json(&body);

        let s = futures::stream::once(async move {
            let response = builder
                .send()
                .await
                .map_err(|e| LlmError::Network(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(LlmError::Api { status: status.as_u16(), body });
            }
            Ok(response)
        })
        .flat_map(|res| match res {
            Ok(response) => response
                .bytes_stream()
                .eventsource()
                .filter_map(|event| async move {
                    match event {
                        Ok(event) => {
                            // The endpoint terminates the stream with "[DONE]".
                            if event.data.trim() == "[DONE]" {
                                return None;
                            }
                            match serde_json::from_str::<StreamChunk>(&event.data) {
                                Ok(chunk) => chunk
                                    .choices
                                    .into_iter()
                                    .next()
                                    .and_then(|c| c.delta.content)
                                    .filter(|t| !t.is_empty())
                                    .map(Ok),
                                Err(e) => {
                                    tracing::warn!(data = %event.data, error = %e, "unparseable stream chunk");
                                    None
                                }
                            }
                        }
                        Err(e) => Some(Err(LlmError::Network(e.to_string()))),
                    }
                })
                .boxed(),
            Err(e) => futures::stream::once(async move { Err(e) }).boxed(),
        });

        s.boxed()
    }
}
