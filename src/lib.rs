pub mod types;
pub mod config;
pub mod events;
pub mod transitions;
pub mod ledger;
pub mod trace;
pub mod context;
pub mod prompts;
pub mod turn;
pub mod registry;
pub mod engine;
pub mod builder;
pub mod error;
pub mod states;
pub mod llm;
pub mod mcp;
pub mod elog;
pub mod rerank;
pub mod graph;

// Convenience re-exports at crate root
pub use builder::TurnBuilder;
pub use engine::{TurnCtx, TurnEngine};
pub use turn::TurnMemory;
pub use types::{
    ChatMessage, Plan, PlanAction, PlanStep, PlanStrategy, State, ToolOutcome, ToolSelection,
    TurnSignal, UploadedFile,
};
pub use config::TurnConfig;
pub use events::Event;
pub use registry::{ToolDescriptor, ToolRegistry};
pub use ledger::UsageLedger;
pub use llm::{ChatClient, ChatRequest, MockChatClient, OllamaChatClient, RetryingChatClient};
pub use trace::{ExecutionLog, LogEntry};
pub use error::AgentError;
