use crate::events::Event;
use crate::types::State;
use std::collections::HashMap;

pub type TransitionTable = HashMap<(State, Event), State>;

/// Builds the complete, immutable transition table.
/// This function defines ALL legal behaviors of a turn.
/// Any (State, Event) pair not in this table is illegal and
/// will cause TurnEngine::run() to return AgentError::InvalidTransition.
pub fn build_transition_table() -> TransitionTable {
    let mut t = HashMap::new();

    // ── START ────────────────────────────────────────────
    t.insert((State::start(),         Event::Begin),               State::decide_tools());
    t.insert((State::start(),         Event::ToolsDisabled),       State::answer_direct());
    t.insert((State::start(),         Event::FatalError),          State::error());

    // ── DECIDE_TOOLS ─────────────────────────────────────
    t.insert((State::decide_tools(),  Event::NeedsTools),          State::select_tools());
    t.insert((State::decide_tools(),  Event::NoToolsNeeded),       State::answer_direct());
    t.insert((State::decide_tools(),  Event::FatalError),          State::error());

    // ── SELECT_TOOLS ─────────────────────────────────────
    t.insert((State::select_tools(),  Event::SelectionReady),      State::execute());
    t.insert((State::select_tools(),  Event::FatalError),          State::error());

    // ── EXECUTE ──────────────────────────────────────────
    t.insert((State::execute(),       Event::ExecutionDone),       State::evaluate());
    t.insert((State::execute(),       Event::FatalError),          State::error());

    // ── EVALUATE ─────────────────────────────────────────
    t.insert((State::evaluate(),      Event::Adequate),            State::synthesize());
    t.insert((State::evaluate(),      Event::Inadequate),          State::refine());
    t.insert((State::evaluate(),      Event::IterationsExhausted), State::ask_user());
    t.insert((State::evaluate(),      Event::FatalError),          State::error());

    // ── REFINE ───────────────────────────────────────────
    t.insert((State::refine(),        Event::RefineReady),         State::select_tools());

    // ── TERMINAL PATHS ───────────────────────────────────
    t.insert((State::synthesize(),    Event::AnswerComplete),      State::done());
    t.insert((State::synthesize(),    Event::FatalError),          State::error());
    t.insert((State::answer_direct(), Event::AnswerComplete),      State::done());
    t.insert((State::answer_direct(), Event::FatalError),          State::error());
    t.insert((State::ask_user(),      Event::ClarificationIssued), State::done());

    // Note: DONE and ERROR are terminal — no outgoing transitions.
    // Cancellation is handled by the engine before table lookup.

    t
}

/// Validates that a given (state, event) pair is legal.
pub fn is_valid_transition(table: &TransitionTable, state: &State, event: &Event) -> bool {
    table.contains_key(&(state.clone(), event.clone()))
}
