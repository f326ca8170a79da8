use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named state in the turn's state machine.
///
/// States are identified by their string name. The library ships with
/// the well-known constants of the planner/executor loop
/// (`State::decide_tools()`, `State::execute()`, …).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct State(pub String);

impl State {
    /// Create a new state with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the string name of this state.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is one of the terminal states
    /// (`"Done"` or `"Error"`).
    pub fn is_terminal(&self) -> bool {
        self.0 == "Done" || self.0 == "Error"
    }

    // ── Well-known built-in state constructors ──────────────────────────
    pub fn start()         -> Self { Self::new("Start") }
    pub fn decide_tools()  -> Self { Self::new("DecideTools") }
    pub fn select_tools()  -> Self { Self::new("SelectTools") }
    pub fn execute()       -> Self { Self::new("Execute") }
    pub fn evaluate()      -> Self { Self::new("Evaluate") }
    pub fn refine()        -> Self { Self::new("Refine") }
    pub fn synthesize()    -> Self { Self::new("Synthesize") }
    pub fn answer_direct() -> Self { Self::new("AnswerDirect") }
    pub fn ask_user()      -> Self { Self::new("AskUser") }
    pub fn done()          -> Self { Self::new("Done") }
    pub fn error()         -> Self { Self::new("Error") }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One message of the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role:    String,   // "user" | "assistant"
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// What kind of file the user attached to the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Image,
    Document,
}

/// A file uploaded alongside the query. Text extraction happens upstream;
/// this carries only the summary and (for documents) the extracted text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name:    String,
    pub kind:    FileKind,
    /// Short preview used in decision prompts.
    pub preview: String,
    /// Full extracted text, present for documents only.
    pub text:    Option<String>,
}

/// A tool invocation proposed by the planner LLM, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSelection {
    pub tool_name: String,
    pub arguments: Value,
    #[serde(default)]
    pub reasoning: String,
}

/// What a plan step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    ToolCall,
    Evaluate,
    Synthesize,
}

/// One step of a validated plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: usize,
    pub action:  PlanAction,
    /// Tool invocations of a `ToolCall` step; empty otherwise.
    #[serde(default)]
    pub invocations: Vec<ToolSelection>,
    #[serde(default)]
    pub evaluation_criteria: Option<String>,
    /// Step that must complete before this one.
    #[serde(default)]
    pub depends_on: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    Direct,
    MultiTool,
    None,
}

/// The schema-validated procedure one selection round commits to:
/// execute the surviving invocations, evaluate, then synthesize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub strategy:   PlanStrategy,
    pub confidence: f64,
    pub reasoning:  String,
    pub steps:      Vec<PlanStep>,
}

impl Plan {
    /// Build the plan committed by a selection round. Steps execute in
    /// declared order; each depends on its predecessor.
    pub fn from_selections(selections: &[ToolSelection], confidence: f64, reasoning: String) -> Self {
        let strategy = match selections.len() {
            0 => PlanStrategy::None,
            1 => PlanStrategy::Direct,
            _ => PlanStrategy::MultiTool,
        };
        Self {
            strategy,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning,
            steps: vec![
                PlanStep {
                    step_id:             1,
                    action:              PlanAction::ToolCall,
                    invocations:         selections.to_vec(),
                    evaluation_criteria: None,
                    depends_on:          None,
                },
                PlanStep {
                    step_id:             2,
                    action:              PlanAction::Evaluate,
                    invocations:         Vec::new(),
                    evaluation_criteria: Some("results must be topically relevant and detailed enough to answer".to_string()),
                    depends_on:          Some(1),
                },
                PlanStep {
                    step_id:             3,
                    action:              PlanAction::Synthesize,
                    invocations:         Vec::new(),
                    evaluation_criteria: None,
                    depends_on:          Some(2),
                },
            ],
        }
    }
}

/// A completed tool invocation: frozen arguments plus payload or error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool:       String,
    pub arguments:  Value,
    pub success:    bool,
    pub data:       Option<Value>,
    pub error:      Option<String>,
    pub latency_ms: u64,
}

impl ToolOutcome {
    pub fn success(tool: String, arguments: Value, data: Value, latency_ms: u64) -> Self {
        Self { tool, arguments, success: true, data: Some(data), error: None, latency_ms }
    }

    pub fn failure(tool: String, arguments: Value, error: String, latency_ms: u64) -> Self {
        Self { tool, arguments, success: false, data: None, error: Some(error), latency_ms }
    }
}

/// The verdict of the evaluation step over one round of tool results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationVerdict {
    pub adequate:   bool,
    #[serde(default)]
    pub reasoning:  String,
    #[serde(default)]
    pub refinement: Option<String>,
}

/// User-visible control signals emitted while a turn advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TurnSignal {
    /// A token of the streamed final answer.
    StreamedToken(String),
    /// A named step began execution.
    StepStarted { name: String },
    /// A named step finished, with a one-line summary.
    StepFinished { name: String, summary: String },
    /// The agent gave up and asks the user to redirect it.
    ClarificationPrompt(String),
    /// The turn was canceled at a suspension point.
    Canceled,
    /// The turn terminated with a user-visible error.
    Error(String),
}
