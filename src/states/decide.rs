use crate::context;
use crate::engine::TurnCtx;
use crate::events::Event;
use crate::prompts;
use crate::states::{chat_json, send, JsonCall, TurnState};
use crate::turn::TurnMemory;
use crate::types::TurnSignal;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

pub struct DecideToolsState;

#[async_trait]
impl TurnState for DecideToolsState {
    fn name(&self) -> &'static str { "DecideTools" }

    async fn handle(
        &self,
        memory: &mut TurnMemory,
        ctx:    &TurnCtx,
        tx:     Option<&UnboundedSender<TurnSignal>>,
    ) -> Event {
        send(tx, TurnSignal::StepStarted { name: "Decision: Tools Needed?".to_string() });

        let prompt = prompts::decide_tools(
            &memory.system_context,
            &memory.query,
            &context::tools_summary(&ctx.registry),
            &memory.conversation_context(),
            &context::files_summary(&memory.files),
        );

        let (needs_tools, reasoning) = match chat_json(memory, ctx, &prompt, "decide_tools").await {
            JsonCall::Parsed(value) => (
                // Bias toward tools: an answer missing the field counts
                // as a yes.
                value.get("needs_tools").and_then(|v| v.as_bool()).unwrap_or(true),
                value
                    .get("reasoning")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            ),
            JsonCall::Unparseable => (true, "decision unparseable — defaulting to tools".to_string()),
            JsonCall::ServiceError(e) => {
                memory.error = Some(format!("LLM unavailable during decision: {}", e));
                memory.record("DecideTools", "LLM_ERROR", &e.to_string());
                return Event::FatalError;
            }
        };

        memory.needs_tools = needs_tools;
        memory.record("DecideTools", "DECISION", &format!(
            "needs_tools={} reasoning='{}'",
            needs_tools,
            reasoning.chars().take(120).collect::<String>()
        ));
        send(tx, TurnSignal::StepFinished {
            name:    "Decision: Tools Needed?".to_string(),
            summary: format!("{} — {}", if needs_tools { "Yes" } else { "No" }, reasoning),
        });

        if needs_tools {
            Event::NeedsTools
        } else {
            Event::NoToolsNeeded
        }
    }
}
