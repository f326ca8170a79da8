use crate::context;
use crate::engine::TurnCtx;
use crate::events::Event;
use crate::prompts;
use crate::states::{chat_json, send, JsonCall, TurnState};
use crate::turn::TurnMemory;
use crate::types::{Plan, ToolSelection, TurnSignal};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

pub struct SelectToolsState;

#[async_trait]
impl TurnState for SelectToolsState {
    fn name(&self) -> &'static str { "SelectTools" }

    async fn handle(
        &self,
        memory: &mut TurnMemory,
        ctx:    &TurnCtx,
        tx:     Option<&UnboundedSender<TurnSignal>>,
    ) -> Event {
        memory.selected.clear();
        memory.rejected.clear();
        memory.results.clear();

        // The evaluate step owns the iteration bound; this guard only
        // catches a mis-wired loop.
        if memory.iteration >= memory.config.iteration_bound() {
            memory.record("SelectTools", "ITERATION_GUARD", "at bound — forcing empty selection");
            return Event::SelectionReady;
        }

        send(tx, TurnSignal::StepStarted { name: "Selecting tools".to_string() });

        let prompt = prompts::select_tools(
            &memory.system_context,
            &memory.query,
            &context::tools_detailed(&ctx.registry),
            &memory.conversation_context(),
            &context::refinement_context(memory.iteration, memory.refinement.as_deref()),
        );

        let mut plan_confidence = 1.0;
        let mut plan_reasoning = String::new();
        let proposed: Vec<ToolSelection> = match chat_json(memory, ctx, &prompt, "select_tools").await {
            JsonCall::Parsed(value) => {
                plan_confidence = value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(1.0);
                plan_reasoning = value
                    .get("reasoning")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                value
                    .get("tools")
                    .cloned()
                    .and_then(|tools| serde_json::from_value(tools).ok())
                    .unwrap_or_default()
            }
            JsonCall::Unparseable => {
                // An empty survivor set pushes the turn into evaluation,
                // which will refine or give up.
                memory.record("SelectTools", "UNPARSEABLE", "no valid selection — empty set");
                Vec::new()
            }
            JsonCall::ServiceError(e) => {
                memory.error = Some(format!("LLM unavailable during selection: {}", e));
                memory.record("SelectTools", "LLM_ERROR", &e.to_string());
                return Event::FatalError;
            }
        };

        for selection in proposed {
            // Registry membership and argument schema first; the ledger
            // only sees structurally valid calls.
            if let Err(violation) = ctx.registry.validate_arguments(&selection.tool_name, &selection.arguments) {
                let reason = violation.to_string();
                memory.record("SelectTools", "SCHEMA_REJECT", &format!(
                    "tool='{}' reason='{}'", selection.tool_name, reason
                ));
                memory.rejected.push((selection, reason));
                continue;
            }

            if let Err(policy) = memory.ledger.admit(&selection.tool_name, &selection.arguments) {
                let reason = policy.to_string();
                memory.record("SelectTools", "POLICY_REJECT", &format!(
                    "tool='{}' reason='{}'", selection.tool_name, reason
                ));
                memory.rejected.push((selection, reason));
                continue;
            }

            memory.record("SelectTools", "SELECTED", &format!(
                "tool='{}' args={}", selection.tool_name, selection.arguments
            ));
            memory.selected.push(selection);
        }

        let plan = Plan::from_selections(&memory.selected, plan_confidence, plan_reasoning);
        memory.record("SelectTools", "PLAN_COMMITTED", &format!(
            "strategy={:?} steps={} confidence={:.2}",
            plan.strategy,
            plan.steps.len(),
            plan.confidence
        ));
        memory.plan = Some(plan);

        send(tx, TurnSignal::StepFinished {
            name:    "Selecting tools".to_string(),
            summary: format!(
                "{} selected, {} rejected",
                memory.selected.len(),
                memory.rejected.len()
            ),
        });

        Event::SelectionReady
    }
}
