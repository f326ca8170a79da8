use crate::error::AgentError;
use crate::events::Event;
use crate::llm::ChatClient;
use crate::mcp::ToolRouter;
use crate::registry::ToolRegistry;
use crate::states::TurnState;
use crate::transitions::TransitionTable;
use crate::turn::TurnMemory;
use crate::types::{State, TurnSignal};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Shared collaborators of every state handler. The registry is
/// read-only after session bootstrap; the cancellation token is the
/// handle an external cancel signal pulls.
#[derive(Clone)]
pub struct TurnCtx {
    pub registry: Arc<ToolRegistry>,
    pub router:   Arc<ToolRouter>,
    pub llm:      Arc<dyn ChatClient>,
    pub cancel:   CancellationToken,
}

/// Driving state machine of one turn. Prefer [`crate::TurnBuilder`] for
/// construction.
pub struct TurnEngine {
    pub memory: TurnMemory,
    ctx:        TurnCtx,
    state:      State,
    transitions: TransitionTable,
    handlers:   HashMap<String, Box<dyn TurnState>>,
}

impl TurnEngine {
    pub fn new(
        memory:      TurnMemory,
        ctx:         TurnCtx,
        transitions: TransitionTable,
        handlers:    HashMap<String, Box<dyn TurnState>>,
    ) -> Self {
        Self { memory, ctx, state: State::start(), transitions, handlers }
    }

    pub fn current_state(&self) -> &State {
        &self.state
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.ctx.cancel.clone()
    }

    /// Run the turn to completion. Returns the final answer (or the
    /// clarification message when the turn ends in ASK_USER).
    pub async fn run(
        &mut self,
        tx: Option<&mpsc::UnboundedSender<TurnSignal>>,
    ) -> Result<String, AgentError> {
        // Transitions form a loop only through Refine, which is bounded;
        // the cap is a backstop against a mis-wired table.
        let safety_cap = (self.memory.config.iteration_bound() + 2) * 6;
        let mut steps = 0;

        while !self.state.is_terminal() {
            steps += 1;
            if steps > safety_cap {
                return Err(AgentError::SafetyCapExceeded(steps));
            }

            if self.ctx.cancel.is_cancelled() {
                return self.finish_canceled(tx);
            }

            self.step(tx).await?;
        }

        if self.state == State::error() {
            let message = self
                .memory
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            if let Some(tx) = tx {
                let _ = tx.send(TurnSignal::Error(message.clone()));
            }
            return Err(AgentError::TurnFailed(message));
        }

        Ok(self
            .memory
            .final_answer
            .clone()
            .unwrap_or_else(|| "[No answer produced]".to_string()))
    }

    /// Executes a single state transition.
    pub async fn step(
        &mut self,
        tx: Option<&mpsc::UnboundedSender<TurnSignal>>,
    ) -> Result<(), AgentError> {
        tracing::info!(state = %self.state, "turn step");

        let state_name = self.state.as_str().to_string();
        let handler = self
            .handlers
            .get(&state_name)
            .ok_or_else(|| AgentError::NoHandlerForState(state_name.clone()))?;

        let event: Event = handler.handle(&mut self.memory, &self.ctx, tx).await;

        tracing::debug!(state = %self.state, event = %event, "state produced event");

        // Cancellation bypasses the transition table: any state may
        // report it and the turn tears down.
        if event == Event::Canceled {
            self.finish_canceled(tx)?;
            unreachable!("finish_canceled always errors");
        }

        let key = (self.state.clone(), event.clone());
        let next_state = self
            .transitions
            .get(&key)
            .cloned()
            .ok_or(AgentError::InvalidTransition { from: self.state.clone(), event })?;

        tracing::info!(from = %self.state, to = %next_state, "transition");
        self.state = next_state;
        Ok(())
    }

    fn finish_canceled(
        &mut self,
        tx: Option<&mpsc::UnboundedSender<TurnSignal>>,
    ) -> Result<String, AgentError> {
        self.memory.record(self.state.as_str(), "CANCELED", "turn torn down");
        self.state = State::done();
        if let Some(tx) = tx {
            let _ = tx.send(TurnSignal::Canceled);
        }
        Err(AgentError::Canceled)
    }

    /// Run the turn in the background and surface its control signals as
    /// a stream. The stream ends when the turn completes, errors, or is
    /// canceled.
    pub fn run_streaming(mut self) -> BoxStream<'static, TurnSignal> {
        use futures::StreamExt;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            match self.run(Some(&tx)).await {
                Ok(_) | Err(AgentError::Canceled) => {}
                // run() already emitted TurnSignal::Error for turn
                // failures; engine-level faults surface here.
                Err(AgentError::TurnFailed(_)) => {}
                Err(e) => {
                    let _ = tx.send(TurnSignal::Error(e.to_string()));
                }
            }
        });

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|signal| (signal, rx))
        })
        .boxed()
    }
}
