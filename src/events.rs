use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    // ── Lifecycle ───────────────────────────────────────
    /// Emitted by StartState — enters the decision step
    Begin,
    /// Tools are disabled for this turn — answer from conversation alone
    ToolsDisabled,

    // ── Decision outcomes ───────────────────────────────
    /// The model decided external evidence is required
    NeedsTools,
    /// The query is conversational — no tools
    NoToolsNeeded,

    // ── Selection / execution ───────────────────────────
    /// Validation finished; zero or more invocations survived
    SelectionReady,
    /// All invocations of this step completed (or failed individually)
    ExecutionDone,

    // ── Evaluation outcomes ─────────────────────────────
    /// Evidence suffices — synthesize the answer
    Adequate,
    /// Evidence insufficient and refinement budget remains
    Inadequate,
    /// Evidence insufficient and the iteration bound is reached
    IterationsExhausted,

    // ── Refinement ──────────────────────────────────────
    /// Refinement hint stored, iteration counter bumped
    RefineReady,

    // ── Terminal paths ──────────────────────────────────
    /// A final answer was produced (synthesized or direct)
    AnswerComplete,
    /// The clarification prompt was emitted
    ClarificationIssued,
    /// Unrecoverable failure (LLM down after retry, misconfiguration)
    FatalError,
    /// The user canceled the turn
    Canceled,
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
