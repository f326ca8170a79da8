use crate::engine::TurnCtx;
use crate::events::Event;
use crate::states::{send, TurnState};
use crate::turn::TurnMemory;
use crate::types::TurnSignal;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

/// Bumps the iteration counter and carries the refinement hint into the
/// next selection. No tool calls, no LLM calls.
pub struct RefineState;

#[async_trait]
impl TurnState for RefineState {
    fn name(&self) -> &'static str { "Refine" }

    async fn handle(
        &self,
        memory: &mut TurnMemory,
        _ctx:   &TurnCtx,
        tx:     Option<&UnboundedSender<TurnSignal>>,
    ) -> Event {
        memory.iteration += 1;
        let hint = memory.refinement.clone().unwrap_or_default();
        memory.record("Refine", "REFINE", &format!(
            "iteration={}/{} hint='{}'",
            memory.iteration,
            memory.config.iteration_bound(),
            hint.chars().take(120).collect::<String>()
        ));
        send(tx, TurnSignal::StepStarted {
            name: format!("Refining (attempt {})", memory.iteration + 1),
        });
        Event::RefineReady
    }
}
