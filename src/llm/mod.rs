use crate::error::LlmError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

mod ollama;
mod mock;
mod retry;

pub use mock::MockChatClient;
pub use ollama::OllamaChatClient;
pub use retry::RetryingChatClient;

/// Wall-clock cap on a non-streaming chat call, in seconds.
pub const CHAT_TIMEOUT_SECS: u64 = 60;

/// Idle cap on the gap between two streamed tokens, in seconds.
/// Streaming has no total wall-clock cap.
pub const STREAM_IDLE_TIMEOUT_SECS: u64 = 45;

/// One prompt sent to the chat endpoint. Every LLM call of a turn is a
/// single user message; the system context is baked into the prompt.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model:       String,
    pub temperature: f32,
    pub prompt:      String,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, temperature: f32, prompt: impl Into<String>) -> Self {
        Self { model: model.into(), temperature, prompt: prompt.into() }
    }
}

/// The single interface between the state machine and any chat backend.
///
/// # Contract
/// - Must be Send + Sync (used behind Arc<dyn ChatClient>)
/// - `chat` returns the full completion text, or Err for network,
///   API and timeout failures
/// - `chat_stream` yields token chunks; the caller enforces the idle
///   timeout between chunks
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError>;

    fn chat_stream<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxStream<'a, Result<String, LlmError>>;
}

/// Extracts the first balanced JSON object from a possibly chatty model
/// reply. Reasoning models wrap their JSON in prose; this finds the
/// outermost `{ … }` and parses it.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + offset + 1];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}
