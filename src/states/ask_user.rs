use crate::engine::TurnCtx;
use crate::events::Event;
use crate::prompts;
use crate::states::{send, TurnState};
use crate::turn::TurnMemory;
use crate::types::TurnSignal;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

/// Ends the turn with a templated clarification instead of an answer:
/// what was tried, why it was judged inadequate, and how the user can
/// redirect the search.
pub struct AskUserState;

#[async_trait]
impl TurnState for AskUserState {
    fn name(&self) -> &'static str { "AskUser" }

    async fn handle(
        &self,
        memory: &mut TurnMemory,
        _ctx:   &TurnCtx,
        tx:     Option<&UnboundedSender<TurnSignal>>,
    ) -> Event {
        let message = prompts::clarification_message(&memory.query, &memory.attempts);

        memory.record("AskUser", "CLARIFICATION", &format!(
            "attempts={} tools_tried={}",
            memory.attempts.len(),
            memory.log.tools_tried().join(",")
        ));

        send(tx, TurnSignal::ClarificationPrompt(message.clone()));
        memory.final_answer = Some(message);

        Event::ClarificationIssued
    }
}
