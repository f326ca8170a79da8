use crate::config::TurnConfig;
use crate::engine::{TurnCtx, TurnEngine};
use crate::error::AgentError;
use crate::llm::{ChatClient, OllamaChatClient, RetryingChatClient};
use crate::mcp::{ToolRouter, ToolServer};
use crate::registry::ToolRegistry;
use crate::states::*;
use crate::transitions::build_transition_table;
use crate::turn::TurnMemory;
use crate::types::{ChatMessage, UploadedFile};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Ergonomic construction of a [`TurnEngine`].
///
/// ```no_run
/// # use accel_assist::TurnBuilder;
/// # async fn example() -> Result<(), accel_assist::AgentError> {
/// let mut engine = TurnBuilder::new("beam dump events last week")
///     .ollama("http://localhost:11434/v1")
///     .build()
///     .await?;
/// let answer = engine.run(None).await?;
/// # Ok(())
/// # }
/// ```
pub struct TurnBuilder {
    query:    String,
    history:  Vec<ChatMessage>,
    files:    Vec<UploadedFile>,
    config:   TurnConfig,
    llm:      Option<Arc<dyn ChatClient>>,
    servers:  Vec<Arc<dyn ToolServer>>,
    wired:    Option<(Arc<ToolRouter>, Arc<ToolRegistry>)>,
    cancel:   CancellationToken,
}

impl TurnBuilder {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query:   query.into(),
            history: Vec::new(),
            files:   Vec::new(),
            config:  TurnConfig::default(),
            llm:     None,
            servers: Vec::new(),
            wired:   None,
            cancel:  CancellationToken::new(),
        }
    }

    // ── Turn inputs ──────────────────────────────────────────────────────

    pub fn history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn files(mut self, files: Vec<UploadedFile>) -> Self {
        self.files = files;
        self
    }

    pub fn config(mut self, config: TurnConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    pub fn tools_enabled(mut self, enabled: bool) -> Self {
        self.config.tools_enabled = enabled;
        self
    }

    pub fn max_iterations(mut self, bound: usize) -> Self {
        self.config.max_iterations = bound;
        self
    }

    pub fn system_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.config.system_prompt_template = template.into();
        self
    }

    // ── Collaborators ────────────────────────────────────────────────────

    /// Set the chat client explicitly.
    pub fn llm(mut self, llm: Arc<dyn ChatClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Use an Ollama endpoint (OpenAI-compatible), wrapped in the
    /// single-retry policy.
    pub fn ollama(mut self, base_url: impl Into<String>) -> Self {
        let inner: Arc<dyn ChatClient> = Arc::new(OllamaChatClient::new(base_url));
        self.llm = Some(Arc::new(RetryingChatClient::new(inner)));
        self
    }

    /// Register a tool server to connect at build time. May be called
    /// repeatedly.
    pub fn server(mut self, server: Arc<dyn ToolServer>) -> Self {
        self.servers.push(server);
        self
    }

    /// Inject an already-bootstrapped router and registry, reusing the
    /// session across turns (the normal case — bootstrap happens once
    /// per session, not per turn).
    pub fn session(mut self, router: Arc<ToolRouter>, registry: Arc<ToolRegistry>) -> Self {
        self.wired = Some((router, registry));
        self
    }

    /// Cancellation token checked at every suspension point.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    // ── Build ────────────────────────────────────────────────────────────

    pub async fn build(self) -> Result<TurnEngine, AgentError> {
        let llm = self
            .llm
            .ok_or_else(|| AgentError::TurnFailed("no chat client configured".to_string()))?;

        let (router, registry) = match self.wired {
            Some(wired) => wired,
            None => {
                let (router, registry) = ToolRouter::bootstrap(self.servers).await;
                (Arc::new(router), Arc::new(registry))
            }
        };

        if self.config.tools_enabled && registry.is_empty() {
            return Err(AgentError::EmptyRegistry);
        }

        let memory = TurnMemory::new(self.query)
            .with_history(self.history)
            .with_files(self.files)
            .with_config(self.config);

        let ctx = TurnCtx {
            registry,
            router,
            llm,
            cancel: self.cancel,
        };

        let mut handlers: HashMap<String, Box<dyn TurnState>> = HashMap::new();
        for handler in default_handlers() {
            handlers.insert(handler.name().to_string(), handler);
        }

        Ok(TurnEngine::new(memory, ctx, build_transition_table(), handlers))
    }
}

fn default_handlers() -> Vec<Box<dyn TurnState>> {
    vec![
        Box::new(StartState),
        Box::new(DecideToolsState),
        Box::new(SelectToolsState),
        Box::new(ExecuteState),
        Box::new(EvaluateState),
        Box::new(RefineState),
        Box::new(SynthesizeState),
        Box::new(AnswerDirectState),
        Box::new(AskUserState),
    ]
}
