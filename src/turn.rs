use crate::config::TurnConfig;
use crate::context;
use crate::ledger::UsageLedger;
use crate::prompts::{self, AttemptSummary};
use crate::registry::ToolRegistry;
use crate::trace::ExecutionLog;
use crate::types::{ChatMessage, Plan, ToolOutcome, ToolSelection, UploadedFile};

/// Everything one turn knows. Created on user submit, owned exclusively
/// by the engine, discarded when the final answer is sent or the turn
/// aborts.
#[derive(Debug)]
pub struct TurnMemory {
    // ── Turn definition ──────────────────────────────────
    /// Unique id of this turn, for log correlation.
    pub turn_id:        String,
    /// The user's question.
    pub query:          String,
    /// Conversation so far, oldest first.
    pub history:        Vec<ChatMessage>,
    /// Files attached to this turn.
    pub files:          Vec<UploadedFile>,
    pub config:         TurnConfig,

    // ── Global context (computed once at turn start) ─────
    /// Identity, date/time, ground rules. Flows through every prompt.
    pub system_context: String,

    // ── Planning state ───────────────────────────────────
    pub needs_tools:    bool,
    /// The plan committed by the latest selection round.
    pub plan:           Option<Plan>,
    /// Validated selections awaiting execution.
    pub selected:       Vec<ToolSelection>,
    /// Selections dropped by validation, with the recorded reason.
    pub rejected:       Vec<(ToolSelection, String)>,

    // ── Execution state ──────────────────────────────────
    /// Results of the latest execute round, in submission order.
    pub results:        Vec<ToolOutcome>,
    /// Completed refinement cycles.
    pub iteration:      usize,
    /// Hint from the last failed evaluation, consumed by selection.
    pub refinement:     Option<String>,
    /// One entry per execute/evaluate round, for the clarification
    /// message.
    pub attempts:       Vec<AttemptSummary>,

    // ── Results ──────────────────────────────────────────
    pub final_answer:   Option<String>,
    pub error:          Option<String>,

    // ── Bookkeeping ──────────────────────────────────────
    pub ledger:         UsageLedger,
    pub log:            ExecutionLog,
}

impl TurnMemory {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            turn_id:        uuid::Uuid::new_v4().to_string(),
            query:          query.into(),
            history:        Vec::new(),
            files:          Vec::new(),
            config:         TurnConfig::default(),
            system_context: String::new(),
            needs_tools:    false,
            plan:           None,
            selected:       Vec::new(),
            rejected:       Vec::new(),
            results:        Vec::new(),
            iteration:      0,
            refinement:     None,
            attempts:       Vec::new(),
            final_answer:   None,
            error:          None,
            ledger:         UsageLedger::new(),
            log:            ExecutionLog::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_files(mut self, files: Vec<UploadedFile>) -> Self {
        self.files = files;
        self
    }

    pub fn with_config(mut self, config: TurnConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the turn's global system context: the date/time block plus
    /// the configured template with `{mcp_tools_list}` substituted.
    pub fn build_system_context(&mut self, registry: &ToolRegistry) {
        let mut ctx = context::system_context();
        if !self.config.system_prompt_template.is_empty() {
            let tools_list = context::tools_summary(registry);
            ctx.push('\n');
            ctx.push_str(&prompts::apply_system_template(
                &self.config.system_prompt_template,
                &tools_list,
            ));
        }
        self.system_context = ctx;
    }

    /// Records an event into the execution log. Called by all state
    /// handlers.
    pub fn record(&mut self, state: &str, event: &str, data: &str) {
        let iteration = self.iteration;
        self.log.record(iteration, state, event, data);
    }

    /// Conversation block honoring the configured history bound.
    pub fn conversation_context(&self) -> String {
        context::conversation_context(&self.history, self.config.max_history_messages)
    }
}
