use crate::context;
use crate::engine::TurnCtx;
use crate::events::Event;
use crate::prompts;
use crate::states::{send, stream_answer, TurnState};
use crate::states::synthesize::normalize_latex_delimiters;
use crate::turn::TurnMemory;
use crate::types::TurnSignal;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

/// Answers from conversation history, uploaded files and general
/// knowledge alone. No tool results, hence no citations.
pub struct AnswerDirectState;

#[async_trait]
impl TurnState for AnswerDirectState {
    fn name(&self) -> &'static str { "AnswerDirect" }

    async fn handle(
        &self,
        memory: &mut TurnMemory,
        ctx:    &TurnCtx,
        tx:     Option<&UnboundedSender<TurnSignal>>,
    ) -> Event {
        send(tx, TurnSignal::StepStarted { name: "Answering".to_string() });

        let prompt = prompts::answer_direct(
            &memory.system_context,
            &memory.query,
            &memory.conversation_context(),
            &context::files_full(&memory.files),
        );

        match stream_answer(memory, ctx, tx, &prompt).await {
            Ok(answer) => {
                let answer = normalize_latex_delimiters(&answer);
                memory.record("AnswerDirect", "ANSWER_STREAMED", &format!("chars={}", answer.len()));
                memory.final_answer = Some(answer);
                Event::AnswerComplete
            }
            Err(_) if ctx.cancel.is_cancelled() => {
                memory.record("AnswerDirect", "CANCELED", "answer stream stopped");
                Event::Canceled
            }
            Err(e) => {
                memory.error = Some(format!("answer generation failed: {}", e));
                memory.record("AnswerDirect", "LLM_ERROR", &e.to_string());
                Event::FatalError
            }
        }
    }
}
