//! Context builders: pure functions producing the prompt blocks shared
//! across the turn's LLM calls. Built once per turn where possible and
//! threaded through the state machine.

use crate::registry::ToolRegistry;
use crate::types::{ChatMessage, FileKind, UploadedFile};
use chrono::Local;
use serde_json::Value;

/// Character budget of a history message inside the conversation block.
const HISTORY_MESSAGE_CHARS: usize = 200;

/// Character budget of file previews and tool summaries.
const PREVIEW_CHARS: usize = 100;

/// Enum options shown per parameter in the detailed tool block.
const ENUM_OPTIONS_SHOWN: usize = 5;

/// Identity, current date and time, behavioral ground rules.
pub fn system_context() -> String {
    let now = Local::now();
    format!(
        "You are the assistant of the Paul Scherrer Institute, a research institute \
         operating particle-accelerator facilities in Switzerland.\n\n\
         **Current Date and Time:** {}\n\
         **Current Date (for calculations):** {}\n\n\
         **Your Role:**\n\
         - Provide concise, accurate, and scientific answers\n\
         - Ground your responses in factual information\n\
         - Use proper technical terminology\n\
         - Cite sources when using external information\n",
        now.format("%A, %B %d, %Y at %H:%M:%S"),
        now.format("%Y-%m-%d"),
    )
}

/// The last `n` messages, each truncated to 200 characters. Empty input
/// renders as the empty string.
pub fn conversation_context(history: &[ChatMessage], n: usize) -> String {
    if history.is_empty() || n == 0 {
        return String::new();
    }

    let start = history.len().saturating_sub(n);
    let lines: Vec<String> = history[start..]
        .iter()
        .map(|message| {
            let role = capitalize(&message.role);
            format!("{}: {}", role, truncate_chars(&message.content, HISTORY_MESSAGE_CHARS))
        })
        .collect();

    format!("\n**Recent Conversation:**\n{}\n", lines.join("\n"))
}

/// File names with short previews; enough for deciding whether tools are
/// needed without pulling full documents into the prompt.
pub fn files_summary(files: &[UploadedFile]) -> String {
    if files.is_empty() {
        return String::new();
    }

    let lines: Vec<String> = files
        .iter()
        .map(|file| match file.kind {
            FileKind::Image => format!("- Image: {}", file.name),
            FileKind::Document => format!(
                "- Document: {} - {}",
                file.name,
                truncate_chars(&file.preview, PREVIEW_CHARS)
            ),
        })
        .collect();

    format!("\n**Uploaded Files:**\n{}\n", lines.join("\n"))
}

/// Full extracted file text. Unbounded — the caller owns the token
/// budget.
pub fn files_full(files: &[UploadedFile]) -> String {
    if files.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = files
        .iter()
        .map(|file| match file.kind {
            FileKind::Image => format!("**Image: {}**\n[Image uploaded]", file.name),
            FileKind::Document => match &file.text {
                Some(text) => format!("**Document: {}**\n{}", file.name, text),
                None => format!("**Document: {}**\n[No preview available]", file.name),
            },
        })
        .collect();

    format!("\n**Uploaded Files:**\n{}\n\n", parts.join("\n"))
}

/// One line per tool: `- name: description` with the description capped
/// at 100 characters. Used by the decision prompt and the
/// `{mcp_tools_list}` substitution.
pub fn tools_summary(registry: &ToolRegistry) -> String {
    registry
        .descriptors()
        .map(|d| format!("- {}: {}", d.name, truncate_chars(&d.description, PREVIEW_CHARS)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full tool schemas: every parameter with its type, the first five enum
/// options and the required marker. Registry iteration is name-sorted,
/// so repeated calls are byte-identical.
pub fn tools_detailed(registry: &ToolRegistry) -> String {
    let mut blocks = Vec::new();

    for descriptor in registry.descriptors() {
        let mut block = format!("**{}**\n  Description: {}\n", descriptor.name, descriptor.description);

        let schema = &descriptor.input_schema;
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            if !properties.is_empty() {
                block.push_str("  Parameters:\n");
            }
            let required: Vec<&str> = schema
                .get("required")
                .and_then(Value::as_array)
                .map(|r| r.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();

            for (name, spec) in properties {
                let param_type = spec.get("type").and_then(Value::as_str).unwrap_or("any");
                block.push_str(&format!("    - {} ({})", name, param_type));

                if let Some(options) = spec.get("enum").and_then(Value::as_array) {
                    let shown: Vec<String> = options
                        .iter()
                        .take(ENUM_OPTIONS_SHOWN)
                        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                        .collect();
                    let suffix = if options.len() > ENUM_OPTIONS_SHOWN { ", …" } else { "" };
                    block.push_str(&format!(" [options: {}{}]", shown.join(", "), suffix));
                }

                if required.contains(&name.as_str()) {
                    block.push_str(" [REQUIRED]");
                }
                block.push('\n');
            }
        }

        blocks.push(block);
    }

    blocks.join("\n")
}

/// The retry hint carried from a failed evaluation into the next
/// selection. First attempts render as the empty string.
pub fn refinement_context(iteration: usize, refinement: Option<&str>) -> String {
    match refinement {
        Some(suggestion) if iteration > 0 && !suggestion.is_empty() => format!(
            "\n**Previous Attempt #{} Failed**\n\
             Refinement suggestion: {}\n\
             Try a different approach or different tool arguments.\n",
            iteration, suggestion
        ),
        _ => String::new(),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolDescriptor;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.merge(ToolDescriptor {
            name:        "search_elog".to_string(),
            description: "Search the operations logbook".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query":    { "type": "string" },
                    "category": { "type": "string",
                                  "enum": ["Info", "Problem", "Pikett", "Access",
                                           "Measurement summary", "Shift summary"] }
                },
                "required": ["query"]
            }),
            server_id: "elog".to_string(),
        });
        registry
    }

    #[test]
    fn conversation_context_caps_messages_and_length() {
        let history: Vec<ChatMessage> = (0..10)
            .map(|i| ChatMessage::user(format!("message {} {}", i, "x".repeat(300))))
            .collect();
        let block = conversation_context(&history, 6);

        let rendered = block.matches("User:").count();
        assert_eq!(rendered, 6);
        assert!(block.contains("message 4"));
        assert!(!block.contains("message 3 "));
        for line in block.lines().filter(|l| l.starts_with("User:")) {
            assert!(line.chars().count() <= HISTORY_MESSAGE_CHARS + "User: ".len());
        }
    }

    #[test]
    fn empty_history_renders_empty() {
        assert_eq!(conversation_context(&[], 6), "");
    }

    #[test]
    fn tools_detailed_is_stable_across_calls() {
        let registry = registry();
        assert_eq!(tools_detailed(&registry), tools_detailed(&registry));
    }

    #[test]
    fn tools_detailed_shows_types_enums_required() {
        let block = tools_detailed(&registry());
        assert!(block.contains("**search_elog**"));
        assert!(block.contains("- query (string)"));
        assert!(block.contains("[REQUIRED]"));
        // Only the first five enum options are listed.
        assert!(block.contains("Info, Problem, Pikett, Access, Measurement summary, …"));
        assert!(!block.contains("Shift summary]"));
    }

    #[test]
    fn files_summary_previews_are_capped() {
        let files = vec![
            UploadedFile {
                name:    "plot.png".to_string(),
                kind:    FileKind::Image,
                preview: String::new(),
                text:    None,
            },
            UploadedFile {
                name:    "report.pdf".to_string(),
                kind:    FileKind::Document,
                preview: "y".repeat(400),
                text:    Some("full text".to_string()),
            },
        ];
        let block = files_summary(&files);
        assert!(block.contains("- Image: plot.png"));
        let doc_line = block.lines().find(|l| l.contains("report.pdf")).unwrap();
        assert!(doc_line.chars().count() < 150);
    }

    #[test]
    fn refinement_context_only_on_retries() {
        assert_eq!(refinement_context(0, Some("translate to German")), "");
        assert_eq!(refinement_context(1, None), "");
        let block = refinement_context(1, Some("translate to German"));
        assert!(block.contains("Attempt #1"));
        assert!(block.contains("translate to German"));
    }
}
