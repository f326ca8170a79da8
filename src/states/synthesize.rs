use crate::engine::TurnCtx;
use crate::events::Event;
use crate::prompts;
use crate::states::{send, stream_answer, TurnState};
use crate::turn::TurnMemory;
use crate::types::{ToolOutcome, TurnSignal};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

/// Character budget of a single unrecognized tool payload inside the
/// synthesis context.
const GENERIC_PAYLOAD_CHARS: usize = 5_000;

pub struct SynthesizeState;

#[async_trait]
impl TurnState for SynthesizeState {
    fn name(&self) -> &'static str { "Synthesize" }

    async fn handle(
        &self,
        memory: &mut TurnMemory,
        ctx:    &TurnCtx,
        tx:     Option<&UnboundedSender<TurnSignal>>,
    ) -> Event {
        send(tx, TurnSignal::StepStarted { name: "Synthesizing answer".to_string() });

        let assembled = build_tool_context(&memory.results, &memory.files);
        memory.record("Synthesize", "CONTEXT_BUILT", &format!(
            "sources={} images={} context_chars={}",
            assembled.references.len(),
            assembled.images.len(),
            assembled.context_text.len()
        ));

        let references_text = assembled
            .references
            .iter()
            .map(|r| format!("- {}: {} - {}", r.id, r.title, r.url))
            .collect::<Vec<_>>()
            .join("\n");

        let images_text = if assembled.images.is_empty() {
            String::new()
        } else {
            let lines = assembled
                .images
                .iter()
                .map(|img| format!("- Image from {}: {} (Caption: {})", img.source_id, img.url, img.caption))
                .collect::<Vec<_>>()
                .join("\n");
            format!("\n**Available Images:**\n{}\n", lines)
        };

        let prompt = prompts::answer_with_tools(
            &memory.system_context,
            &memory.query,
            &assembled.context_text,
            &references_text,
            &images_text,
        );

        match stream_answer(memory, ctx, tx, &prompt).await {
            Ok(answer) => {
                let answer = normalize_latex_delimiters(&answer);
                memory.record("Synthesize", "ANSWER_STREAMED", &format!("chars={}", answer.len()));
                memory.final_answer = Some(answer);
                Event::AnswerComplete
            }
            Err(_) if ctx.cancel.is_cancelled() => {
                memory.record("Synthesize", "CANCELED", "answer stream stopped");
                Event::Canceled
            }
            Err(e) => {
                memory.error = Some(format!("answer generation failed: {}", e));
                memory.record("Synthesize", "LLM_ERROR", &e.to_string());
                Event::FatalError
            }
        }
    }
}

/// One line of the deduplicated reference list.
#[derive(Debug, Clone)]
pub struct Reference {
    pub id:    String,
    pub title: String,
    pub url:   String,
}

/// An inline-displayable image surfaced by a tool result.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub source_id: String,
    pub url:       String,
    pub caption:   String,
}

#[derive(Debug, Default)]
pub struct AssembledContext {
    pub context_text: String,
    pub references:   Vec<Reference>,
    pub images:       Vec<InlineImage>,
}

/// Turn the round's tool results into prompt context: one block per
/// source, a reference list deduplicated by URL, and the image URLs
/// found along the way. Uploaded files lead the context when present.
pub fn build_tool_context(
    results: &[ToolOutcome],
    files: &[crate::types::UploadedFile],
) -> AssembledContext {
    let mut assembled = AssembledContext::default();
    let mut parts: Vec<String> = Vec::new();
    let mut seen_urls: Vec<String> = Vec::new();

    if !files.is_empty() {
        parts.push("**UPLOADED FILES:**".to_string());
        for file in files {
            match file.kind {
                crate::types::FileKind::Image => {
                    parts.push(format!("[FILE] Image: {}\n[Image uploaded]", file.name));
                }
                crate::types::FileKind::Document => match &file.text {
                    Some(text) => parts.push(format!("[FILE] Document: {}\n{}", file.name, text)),
                    None => parts.push(format!("[FILE] Document: {}", file.name)),
                },
            }
        }
        parts.push("**TOOL RESULTS:**".to_string());
    }

    for outcome in results.iter().filter(|r| r.success) {
        let Some(data) = &outcome.data else { continue };

        if outcome.tool.contains("search_accelerator_knowledge") {
            let items = data
                .get("results")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for item in &items {
                let source_id = format!("AccWiki-{}", assembled.references.len() + 1);
                push_reference(&mut assembled.references, &mut seen_urls, &source_id, item, "Unknown");
                for image in item.get("images").and_then(Value::as_array).into_iter().flatten() {
                    let url = image
                        .get("url")
                        .or_else(|| image.get("src"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    if !url.is_empty() {
                        let caption = image
                            .get("caption")
                            .and_then(Value::as_str)
                            .unwrap_or("Figure")
                            .to_string();
                        assembled.images.push(InlineImage {
                            source_id: source_id.clone(),
                            url:       url.to_string(),
                            caption,
                        });
                    }
                }
                parts.push(context_block(&source_id, item));
            }
        } else if outcome.tool.to_lowercase().contains("elog") {
            let entries = data
                .pointer("/result/thread")
                .or_else(|| data.pointer("/results/hits"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for entry in &entries {
                let source_id = format!("ELOG-{}", assembled.references.len() + 1);
                push_reference(&mut assembled.references, &mut seen_urls, &source_id, entry, "ELOG entry");
                let elog_id = entry.get("elog_id").and_then(Value::as_u64).unwrap_or(0);
                for attachment in entry.get("attachments").and_then(Value::as_array).into_iter().flatten() {
                    let url = attachment.get("url").and_then(Value::as_str).unwrap_or_default();
                    if !url.is_empty() {
                        assembled.images.push(InlineImage {
                            source_id: source_id.clone(),
                            url:       url.to_string(),
                            caption:   format!("Attachment from ELOG #{}", elog_id),
                        });
                    }
                }
                parts.push(context_block(&source_id, entry));
            }
        } else {
            // Generic handler covering the web-search payload shapes.
            let items = data
                .get("top_results")
                .or_else(|| data.pointer("/data/results"))
                .or_else(|| data.pointer("/web/results"))
                .or_else(|| data.get("results").filter(|v| v.is_array()))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_else(|| {
                    if data.get("url").is_some() && data.get("title").is_some() {
                        vec![data.clone()]
                    } else {
                        Vec::new()
                    }
                });

            if items.is_empty() {
                let preview: String = serde_json::to_string_pretty(data)
                    .unwrap_or_default()
                    .chars()
                    .take(GENERIC_PAYLOAD_CHARS)
                    .collect();
                parts.push(format!("[{}]\n{}", outcome.tool, preview));
            } else {
                for item in items.iter().take(5) {
                    let source_id = format!("Web-{}", assembled.references.len() + 1);
                    push_reference(&mut assembled.references, &mut seen_urls, &source_id, item, "Unknown");
                    parts.push(context_block(&source_id, item));
                }
            }
        }
    }

    assembled.context_text = parts.join("\n\n---\n\n");
    assembled
}

fn push_reference(
    references: &mut Vec<Reference>,
    seen_urls: &mut Vec<String>,
    source_id: &str,
    item: &Value,
    default_title: &str,
) {
    let url = item.get("url").and_then(Value::as_str).unwrap_or("N/A").to_string();
    if url != "N/A" && seen_urls.contains(&url) {
        return;
    }
    seen_urls.push(url.clone());
    let title = item
        .get("title")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or(default_title)
        .to_string();
    references.push(Reference { id: source_id.to_string(), title, url });
}

/// Prefer the pre-rendered markdown block shipped by the retrieval
/// layer; fall back to raw fields for older payloads.
fn context_block(source_id: &str, item: &Value) -> String {
    if let Some(formatted) = item.get("formatted_context").and_then(Value::as_str) {
        return format!("[{}]\n{}", source_id, formatted);
    }
    let title = item.get("title").and_then(Value::as_str).unwrap_or("Unknown");
    let content = item
        .get("body_clean")
        .or_else(|| item.get("content"))
        .or_else(|| item.get("snippet"))
        .or_else(|| item.get("description"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let url = item.get("url").and_then(Value::as_str).unwrap_or("N/A");
    format!("[{}] {}\nContent: {}\nURL: {}", source_id, title, content, url)
}

/// Convert LaTeX delimiters the model likes to emit (`\[ \]`, `\( \)`)
/// into the `$$ … $$` / `$ … $` forms the renderer understands.
pub fn normalize_latex_delimiters(text: &str) -> String {
    text.replace("\\$$", "$$")
        .replace("\\[", "$$")
        .replace("\\]", "$$")
        .replace("\\(", "$")
        .replace("\\)", "$")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn elog_outcome() -> ToolOutcome {
        ToolOutcome::success(
            "search_elog".to_string(),
            json!({"query": "beam dump"}),
            json!({
                "results": {
                    "hits": [
                        {
                            "elog_id": 8888,
                            "title": "Beam dump during injection",
                            "url": "https://elog-gfa.psi.ch/SwissFEL+commissioning/8888",
                            "attachments": [
                                { "name": "dump.png", "url": "https://elog-gfa.psi.ch/SwissFEL+commissioning/dump.png" }
                            ],
                            "formatted_context": "### ELOG Entry #8888: Beam dump during injection"
                        },
                        {
                            "elog_id": 8888,
                            "title": "duplicate",
                            "url": "https://elog-gfa.psi.ch/SwissFEL+commissioning/8888"
                        }
                    ],
                    "total_found": 2
                }
            }),
            12,
        )
    }

    #[test]
    fn references_deduplicate_by_url() {
        let assembled = build_tool_context(&[elog_outcome()], &[]);
        assert_eq!(assembled.references.len(), 1);
        assert_eq!(assembled.references[0].id, "ELOG-1");
        assert!(assembled.references[0].url.ends_with("/8888"));
    }

    #[test]
    fn attachments_become_inline_images() {
        let assembled = build_tool_context(&[elog_outcome()], &[]);
        assert_eq!(assembled.images.len(), 1);
        assert_eq!(assembled.images[0].caption, "Attachment from ELOG #8888");
    }

    #[test]
    fn formatted_context_is_preferred() {
        let assembled = build_tool_context(&[elog_outcome()], &[]);
        assert!(assembled.context_text.contains("### ELOG Entry #8888"));
    }

    #[test]
    fn accwiki_and_elog_results_merge() {
        let accwiki = ToolOutcome::success(
            "search_accelerator_knowledge".to_string(),
            json!({"query": "RF system"}),
            json!({
                "results": [
                    { "title": "SwissFEL RF overview", "url": "https://accwiki.psi.ch/rf", "content": "..." }
                ]
            }),
            10,
        );
        let assembled = build_tool_context(&[accwiki, elog_outcome()], &[]);
        let ids: Vec<&str> = assembled.references.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["AccWiki-1", "ELOG-2"]);
    }

    #[test]
    fn failed_results_are_skipped() {
        let failed = ToolOutcome::failure(
            "search_elog".to_string(),
            json!({}),
            "boom".to_string(),
            5,
        );
        let assembled = build_tool_context(&[failed], &[]);
        assert!(assembled.references.is_empty());
        assert!(assembled.context_text.is_empty());
    }

    #[test]
    fn latex_delimiters_normalize() {
        assert_eq!(
            normalize_latex_delimiters(r"energy \[E = mc^2\] inline \(x\)"),
            "energy $$E = mc^2$$ inline $x$"
        );
    }
}
