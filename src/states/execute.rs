use crate::engine::TurnCtx;
use crate::events::Event;
use crate::states::{send, TurnState};
use crate::trace::ToolInvocationRecord;
use crate::turn::TurnMemory;
use crate::types::{ToolOutcome, TurnSignal};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

pub struct ExecuteState;

#[async_trait]
impl TurnState for ExecuteState {
    fn name(&self) -> &'static str { "Execute" }

    async fn handle(
        &self,
        memory: &mut TurnMemory,
        ctx:    &TurnCtx,
        tx:     Option<&UnboundedSender<TurnSignal>>,
    ) -> Event {
        let selections = memory.selected.clone();
        let count = selections.len();
        memory.record("Execute", "EXECUTE_START", &format!("count={}", count));

        // All invocations of this step run concurrently; join_all returns
        // them in submission order, which keeps the execution log and the
        // prompts built from it deterministic.
        let tasks = selections.into_iter().map(|selection| {
            let tx = tx.cloned();
            async move {
                send(tx.as_ref(), TurnSignal::StepStarted {
                    name: format!("Executing: {}", selection.tool_name),
                });
                let started = Instant::now();
                let result = ctx
                    .router
                    .call(&ctx.registry, &selection.tool_name, &selection.arguments)
                    .await;
                let latency_ms = started.elapsed().as_millis() as u64;

                let outcome = match result {
                    Ok(data) => {
                        send(tx.as_ref(), TurnSignal::StepFinished {
                            name:    format!("Executing: {}", selection.tool_name),
                            summary: summarize_payload(&data),
                        });
                        ToolOutcome::success(selection.tool_name, selection.arguments, data, latency_ms)
                    }
                    Err(e) => {
                        let message = e.to_string();
                        send(tx.as_ref(), TurnSignal::StepFinished {
                            name:    format!("Executing: {}", selection.tool_name),
                            summary: format!("Error: {}", message),
                        });
                        ToolOutcome::failure(selection.tool_name, selection.arguments, message, latency_ms)
                    }
                };
                outcome
            }
        });

        let outcomes: Vec<ToolOutcome> = tokio::select! {
            results = join_all(tasks) => results,
            _ = ctx.cancel.cancelled() => {
                memory.record("Execute", "CANCELED", "pending tool calls aborted");
                return Event::Canceled;
            }
        };

        let mut success_count = 0;
        for outcome in &outcomes {
            if outcome.success {
                success_count += 1;
            }
            memory.log.record_invocation(ToolInvocationRecord {
                iteration:  memory.iteration,
                tool:       outcome.tool.clone(),
                arguments:  outcome.arguments.clone(),
                success:    outcome.success,
                error:      outcome.error.clone(),
                latency_ms: outcome.latency_ms,
                timestamp:  Utc::now(),
            });
            if let Some(data) = &outcome.data {
                collect_urls(data, &mut memory.log);
            }
        }

        memory.results = outcomes;
        memory.record("Execute", "EXECUTE_DONE", &format!("success={}/{}", success_count, count));

        Event::ExecutionDone
    }
}

/// Harvest every "url" field of a tool payload into the execution log;
/// the synthesized answer may only cite URLs recorded here.
fn collect_urls(value: &Value, log: &mut crate::trace::ExecutionLog) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if key == "url" {
                    if let Some(url) = nested.as_str() {
                        log.record_url(url);
                    }
                }
                collect_urls(nested, log);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_urls(item, log);
            }
        }
        _ => {}
    }
}

fn summarize_payload(data: &Value) -> String {
    let count = data
        .pointer("/results/hits")
        .or_else(|| data.pointer("/result/thread"))
        .or_else(|| data.get("results"))
        .or_else(|| data.get("top_results"))
        .and_then(Value::as_array)
        .map(|items| items.len());

    match count {
        Some(n) => format!("{} result(s)", n),
        None => "Success".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_nested_urls_once() {
        let mut log = crate::trace::ExecutionLog::new();
        let payload = json!({
            "results": {
                "hits": [
                    { "url": "https://elog.example/1", "attachments": [{ "url": "https://elog.example/a.png" }] },
                    { "url": "https://elog.example/1" }
                ]
            }
        });
        collect_urls(&payload, &mut log);
        let mut urls = log.known_urls().to_vec();
        urls.sort();
        assert_eq!(
            urls,
            vec!["https://elog.example/1".to_string(), "https://elog.example/a.png".to_string()]
        );
    }

    #[test]
    fn summarizes_hit_counts() {
        let payload = json!({ "results": { "hits": [1, 2, 3] } });
        assert_eq!(summarize_payload(&payload), "3 result(s)");
        assert_eq!(summarize_payload(&json!({"ok": true})), "Success");
    }
}
