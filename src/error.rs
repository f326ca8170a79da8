use crate::events::Event;
use crate::types::State;
use thiserror::Error;

/// Top-level error of a turn. Everything recoverable (tool failures,
/// inadequate evidence, rejected selections) is data inside the turn,
/// not an error — only unrecoverable conditions surface here.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid transition: {from} + {event} not in transition table")]
    InvalidTransition { from: State, event: Event },

    #[error("No handler registered for state: {0}")]
    NoHandlerForState(String),

    #[error("Safety cap exceeded after {0} iterations")]
    SafetyCapExceeded(usize),

    #[error("LLM service error: {0}")]
    Llm(String),

    #[error("Tool registry is empty but tools are enabled")]
    EmptyRegistry,

    #[error("Turn canceled")]
    Canceled,

    #[error("Turn failed: {0}")]
    TurnFailed(String),
}

/// Errors of the LLM client layer.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("timed out after {0} s")]
    Timeout(u64),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl LlmError {
    /// Auth failures are never worth a retry.
    pub fn is_auth(&self) -> bool {
        matches!(self, LlmError::Api { status: 401 | 403, .. })
    }
}

/// Errors of the tool transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("server '{0}' is unavailable: {1}")]
    Unavailable(String, String),

    #[error("tool '{0}' is not provided by any connected server")]
    UnknownTool(String),

    #[error("tool call '{0}' timed out after {1} s")]
    Timeout(String, u64),

    #[error("tool '{tool}' returned an error: {message}")]
    ToolError { tool: String, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors of the logbook HTTP client, mirroring the server's failure
/// modes as observed in the wild.
#[derive(Debug, Error)]
pub enum ElogError {
    #[error("message {0} does not exist on the logbook")]
    InvalidMessageId(u32),

    #[error("logbook server problem: {0}")]
    ServerProblem(String),

    #[error("logbook request timed out")]
    Timeout,

    #[error("invalid logbook username or password")]
    Authentication,

    #[error("logbook rejected the request: {0}")]
    MessageRejected(String),

    #[error("invalid search filter: {0}")]
    InvalidFilter(String),
}

/// Errors of the reranker layer.
#[derive(Debug, Error)]
pub enum RerankError {
    #[error("cross-encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("scoring failed: {0}")]
    Scoring(String),
}
