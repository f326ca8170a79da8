use crate::engine::TurnCtx;
use crate::events::Event;
use crate::states::TurnState;
use crate::turn::TurnMemory;
use crate::types::TurnSignal;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

pub struct StartState;

#[async_trait]
impl TurnState for StartState {
    fn name(&self) -> &'static str { "Start" }

    async fn handle(
        &self,
        memory: &mut TurnMemory,
        ctx:    &TurnCtx,
        _tx:    Option<&UnboundedSender<TurnSignal>>,
    ) -> Event {
        memory.build_system_context(&ctx.registry);
        memory.record("Start", "TURN_STARTED", &format!(
            "turn={} query='{}' tools_enabled={} max_iterations={}",
            memory.turn_id,
            memory.query.chars().take(80).collect::<String>(),
            memory.config.tools_enabled,
            memory.config.iteration_bound(),
        ));

        if !memory.config.tools_enabled {
            memory.record("Start", "TOOLS_DISABLED", "answering from conversation and files");
            return Event::ToolsDisabled;
        }

        // An empty registry with tools enabled is a misconfiguration, not
        // a question the agent can think its way around.
        if ctx.registry.is_empty() {
            memory.error = Some("tool registry is empty but tools are enabled".to_string());
            memory.record("Start", "EMPTY_REGISTRY", "no tool servers connected");
            return Event::FatalError;
        }

        Event::Begin
    }
}
