use crate::engine::TurnCtx;
use crate::error::LlmError;
use crate::events::Event;
use crate::llm::{extract_json_object, ChatRequest};
use crate::prompts;
use crate::turn::TurnMemory;
use crate::types::TurnSignal;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

mod start;
mod decide;
mod select;
mod execute;
mod evaluate;
mod refine;
pub mod synthesize;
mod answer_direct;
mod ask_user;

pub use answer_direct::AnswerDirectState;
pub use ask_user::AskUserState;
pub use decide::DecideToolsState;
pub use evaluate::EvaluateState;
pub use execute::ExecuteState;
pub use refine::RefineState;
pub use select::SelectToolsState;
pub use start::StartState;
pub use synthesize::SynthesizeState;

/// The contract every state must fulfill.
///
/// # Implementing a State
///
/// 1. `handle()` performs the state's work using only `memory` and `ctx`.
/// 2. `handle()` MUST return an Event — never panic, never return nothing.
/// 3. If work fails non-fatally (tool error, bad LLM output), store the
///    failure in memory and return the matching Event. Failure is data.
/// 4. Only fatal conditions (LLM down after retry, misconfiguration) may
///    return `Event::FatalError`, after setting `memory.error`.
/// 5. Always call `memory.record()` at least once per handle() call.
#[async_trait]
pub trait TurnState: Send + Sync {
    /// Returns the unique string name of this state.
    /// Must match the key used in the engine's handler map.
    fn name(&self) -> &'static str;

    /// Execute this state's logic. Returns the Event that drives
    /// the next transition lookup in the transition table.
    async fn handle(
        &self,
        memory: &mut TurnMemory,
        ctx:    &TurnCtx,
        tx:     Option<&UnboundedSender<TurnSignal>>,
    ) -> Event;
}

pub(crate) fn send(tx: Option<&UnboundedSender<TurnSignal>>, signal: TurnSignal) {
    if let Some(tx) = tx {
        let _ = tx.send(signal);
    }
}

/// Outcome of a JSON-producing LLM call.
pub(crate) enum JsonCall {
    /// Parsed object.
    Parsed(Value),
    /// Both attempts produced unparseable text — callers apply their
    /// safe default.
    Unparseable,
    /// The service itself failed after its retry.
    ServiceError(LlmError),
}

/// Stream the final answer token by token, enforcing the idle gap cap
/// between tokens. One retry on failure; tokens of a failed attempt may
/// already have reached the user, so the retry restarts the message.
pub(crate) async fn stream_answer(
    memory: &TurnMemory,
    ctx:    &TurnCtx,
    tx:     Option<&UnboundedSender<TurnSignal>>,
    prompt: &str,
) -> Result<String, LlmError> {
    use crate::llm::STREAM_IDLE_TIMEOUT_SECS;
    use futures::StreamExt;
    use std::time::Duration;

    let request = ChatRequest::new(&memory.config.model, memory.config.temperature, prompt);
    let mut last_err = None;

    for attempt in 0..2 {
        if attempt > 0 {
            tracing::warn!("answer stream failed — retrying once");
        }
        let mut stream = ctx.llm.chat_stream(&request);
        let mut answer = String::new();
        let mut failed = None;

        loop {
            let next = tokio::time::timeout(
                Duration::from_secs(STREAM_IDLE_TIMEOUT_SECS),
                stream.next(),
            );
            let item = tokio::select! {
                item = next => item,
                _ = ctx.cancel.cancelled() => return Err(LlmError::Network("canceled".to_string())),
            };
            match item {
                Ok(Some(Ok(token))) => {
                    answer.push_str(&token);
                    send(tx, TurnSignal::StreamedToken(token));
                }
                Ok(Some(Err(e))) => {
                    failed = Some(e);
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    failed = Some(LlmError::Timeout(STREAM_IDLE_TIMEOUT_SECS));
                    break;
                }
            }
        }

        match failed {
            None if !answer.is_empty() => return Ok(answer),
            None => last_err = Some(LlmError::Malformed("empty answer stream".to_string())),
            Some(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| LlmError::Network("stream never started".to_string())))
}

/// Run one JSON-contract LLM call: on malformed output, retry once with
/// a stricter prompt; report service failures separately so callers can
/// distinguish a confused model from a dead endpoint.
pub(crate) async fn chat_json(memory: &TurnMemory, ctx: &TurnCtx, prompt: &str, label: &str) -> JsonCall {
    let request = ChatRequest::new(&memory.config.model, memory.config.temperature, prompt);

    let first = match ctx.llm.chat(&request).await {
        Ok(text) => text,
        Err(e) => return JsonCall::ServiceError(e),
    };
    if let Some(value) = extract_json_object(&first) {
        return JsonCall::Parsed(value);
    }

    tracing::warn!(step = label, "LLM reply was not valid JSON — retrying with strict prompt");
    let strict = format!("{}{}", prompt, prompts::strict_json_suffix());
    let retry_request = ChatRequest::new(&memory.config.model, memory.config.temperature, &strict);
    match ctx.llm.chat(&retry_request).await {
        Ok(text) => match extract_json_object(&text) {
            Some(value) => JsonCall::Parsed(value),
            None => {
                tracing::error!(step = label, "second LLM reply also unparseable — applying safe default");
                JsonCall::Unparseable
            }
        },
        Err(e) => JsonCall::ServiceError(e),
    }
}
