use crate::engine::TurnCtx;
use crate::events::Event;
use crate::prompts::{self, AttemptSummary};
use crate::states::{chat_json, send, JsonCall, TurnState};
use crate::turn::TurnMemory;
use crate::types::{EvaluationVerdict, TurnSignal};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

/// Per-result character budget of the evaluation prompt.
const RESULT_PREVIEW_CHARS: usize = 10_000;

pub struct EvaluateState;

impl EvaluateState {
    /// Route an inadequate verdict: one more refinement round if budget
    /// remains, otherwise hand the turn to the user. The bound is never
    /// allowed to force synthesis over weak evidence.
    fn inadequate(memory: &mut TurnMemory, reasoning: String, refinement: String) -> Event {
        memory.attempts.push(AttemptSummary {
            tools:     memory.results.iter().map(|r| r.tool.clone()).collect(),
            reasoning: reasoning.clone(),
        });
        memory.refinement = Some(refinement);

        if memory.iteration + 1 >= memory.config.iteration_bound() {
            memory.record("Evaluate", "ITERATIONS_EXHAUSTED", &format!(
                "iteration={} bound={}", memory.iteration, memory.config.iteration_bound()
            ));
            Event::IterationsExhausted
        } else {
            memory.record("Evaluate", "INADEQUATE", &reasoning.chars().take(160).collect::<String>());
            Event::Inadequate
        }
    }
}

#[async_trait]
impl TurnState for EvaluateState {
    fn name(&self) -> &'static str { "Evaluate" }

    async fn handle(
        &self,
        memory: &mut TurnMemory,
        ctx:    &TurnCtx,
        tx:     Option<&UnboundedSender<TurnSignal>>,
    ) -> Event {
        send(tx, TurnSignal::StepStarted { name: "Evaluation".to_string() });

        // Nothing survived selection: no evidence to judge.
        if memory.results.is_empty() {
            let rejections: Vec<String> = memory
                .rejected
                .iter()
                .map(|(s, reason)| format!("{}: {}", s.tool_name, reason))
                .collect();
            let reasoning = if rejections.is_empty() {
                "no tools were selected".to_string()
            } else {
                format!("every selection was rejected ({})", rejections.join("; "))
            };
            return Self::inadequate(
                memory,
                reasoning,
                "select different tools or fix the rejected arguments".to_string(),
            );
        }

        let successes: Vec<_> = memory.results.iter().filter(|r| r.success).collect();

        // Every call failed: feed the errors into the refinement hint
        // instead of asking the model to judge nothing.
        if successes.is_empty() {
            let errors: Vec<String> = memory
                .results
                .iter()
                .map(|r| format!("- {}: {}", r.tool, r.error.as_deref().unwrap_or("unknown error")))
                .collect();
            let error_text = errors.join("\n");
            return Self::inadequate(
                memory,
                "all tool calls failed".to_string(),
                format!(
                    "All tool calls failed with errors:\n{}\nAdjust the tool parameters based on \
                     the error messages above.",
                    error_text
                ),
            );
        }

        let summary_text: Vec<String> = successes
            .iter()
            .map(|r| {
                let preview = serde_json::to_string_pretty(r.data.as_ref().unwrap_or(&serde_json::Value::Null))
                    .unwrap_or_default();
                let preview: String = preview.chars().take(RESULT_PREVIEW_CHARS).collect();
                format!("Tool: {}\nData: {}", r.tool, preview)
            })
            .collect();

        let tool_calls_text: Vec<String> = memory
            .results
            .iter()
            .map(|r| format!("- {} with arguments: {}", r.tool, r.arguments))
            .collect();

        let prompt = prompts::evaluate_results(
            &memory.system_context,
            &memory.query,
            &tool_calls_text.join("\n"),
            &summary_text.join("\n\n"),
        );

        let verdict = match chat_json(memory, ctx, &prompt, "evaluate_results").await {
            JsonCall::Parsed(value) => serde_json::from_value::<EvaluationVerdict>(value).ok(),
            JsonCall::Unparseable => None,
            JsonCall::ServiceError(e) => {
                tracing::warn!(error = %e, "evaluator unavailable — treating results as inadequate");
                None
            }
        };

        // A broken evaluator never greenlights synthesis.
        let verdict = verdict.unwrap_or(EvaluationVerdict {
            adequate:   false,
            reasoning:  "evaluator failed".to_string(),
            refinement: Some("rephrase and retry".to_string()),
        });

        send(tx, TurnSignal::StepFinished {
            name:    "Evaluation".to_string(),
            summary: format!(
                "{} — {}",
                if verdict.adequate { "Adequate" } else { "Inadequate" },
                verdict.reasoning
            ),
        });

        if verdict.adequate {
            memory.attempts.push(AttemptSummary {
                tools:     memory.results.iter().map(|r| r.tool.clone()).collect(),
                reasoning: verdict.reasoning.clone(),
            });
            memory.record("Evaluate", "ADEQUATE", &verdict.reasoning.chars().take(160).collect::<String>());
            Event::Adequate
        } else {
            let refinement = verdict
                .refinement
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "rephrase and retry".to_string());
            Self::inadequate(memory, verdict.reasoning, refinement)
        }
    }
}
