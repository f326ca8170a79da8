//! Prompt templates for the four LLM calls of a turn, plus the
//! clarification message. Centralized so prompt iteration never touches
//! the state machine.

/// Substitute the registry summary into a caller-supplied system prompt
/// template. The only recognized placeholder is `{mcp_tools_list}`.
pub fn apply_system_template(template: &str, tools_list: &str) -> String {
    template.replace("{mcp_tools_list}", tools_list)
}

/// Decision prompt: does this question need external tools at all?
pub fn decide_tools(
    system_context: &str,
    query: &str,
    tools_text: &str,
    history_context: &str,
    files_context: &str,
) -> String {
    format!(
        "{system_context}\n\
         **Task:** Decide if you should use tools to answer this question.\n\
         {history_context}{files_context}\n\
         **Current User Question:** {query}\n\n\
         **Available Tools:**\n{tools_text}\n\n\
         **Decision Rules (IMPORTANT: Check conversation history first):**\n\n\
         **FIRST: Check if the answer is already in the conversation history:**\n\
         - If the user asks a follow-up question about information ALREADY retrieved in \
           previous messages, DO NOT use tools again\n\
         - Look for references to specific IDs mentioned in the history (e.g. \"ELOG #12345\", \
           article ids)\n\n\
         **SECOND: When to use tools (default for new queries):**\n\
         - DEFAULT: use tools for NEW questions needing current, external, or facility-specific \
           information not in the conversation history\n\
         - Use tools for operational logs, incidents, accelerator documentation, real-time data\n\n\
         **When NOT to use tools:**\n\
         - Pure greetings: \"hello\", \"hi\", \"thanks\"\n\
         - Follow-up questions about information already in the conversation history\n\
         - Questions about uploaded files or images — answer directly from the file content above\n\
         - Conversation meta-questions: \"what did I just ask?\", \"summarize our conversation\"\n\n\
         Reply with JSON only:\n\
         {{\n  \"needs_tools\": true/false,\n  \"reasoning\": \"brief explanation\"\n}}\n"
    )
}

/// Selection prompt: which tools, with what arguments.
pub fn select_tools(
    system_context: &str,
    query: &str,
    tools_text: &str,
    history_context: &str,
    refinement_context: &str,
) -> String {
    format!(
        "{system_context}\n\
         **Task:** Select which tools to call to answer the user's question.\n\
         {history_context}\n\
         **Current User Question:** {query}\n\n\
         **Available Tools:**\n{tools_text}\n\
         {refinement_context}\n\
         **General Strategy:**\n\
         - Start with minimal arguments — only REQUIRED parameters and those essential for the query\n\
         - Use the elog tool for questions about incidents, events, or operational history\n\
         - Use the knowledge tool for questions about accelerator facilities and documentation\n\
         - Use multiple tools in one plan when it makes sense to cross-reference results\n\
         - Be specific with parameter values (use exact enum options shown above)\n\n\
         **Date Handling:**\n\
         - Use the current date from the system context above to calculate relative dates\n\
         - \"yesterday\" = subtract 1 day; \"last week\" = subtract 7 days for `since`\n\
         - Always use ISO format YYYY-MM-DD for date parameters\n\n\
         **search_accelerator_knowledge:**\n\
         - Extract the facility from the query: \"hipa\", \"proscan\", \"sls\", or \"swissfel\"\n\
         - Use \"all\" only if the query explicitly spans facilities\n\
         - Retriever: default to \"dense\" unless the query needs exact term matching\n\n\
         **search_elog:**\n\
         - Extract filters from the query: category, system, domain, date range\n\
         - Only use `since`/`until` if a time range is mentioned\n\
         - For summaries over a period use a large max_results (50-100); otherwise the default\n\n\
         **get_elog_thread:**\n\
         - Use when the user asks for the full entry or references a specific entry id\n\
         - Extract message_id from the conversation history or the question\n\n\
         Reply with JSON only:\n\
         {{\n  \"tools\": [\n    {{\n      \"tool_name\": \"exact_tool_name\",\n      \
         \"arguments\": {{\"param\": \"value\"}},\n      \"reasoning\": \"why this tool\"\n    }}\n  ]\n}}\n"
    )
}

/// Evaluation prompt: is the evidence adequate?
pub fn evaluate_results(
    system_context: &str,
    query: &str,
    tool_calls_text: &str,
    summary_text: &str,
) -> String {
    let tool_calls_section = if tool_calls_text.is_empty() {
        String::new()
    } else {
        format!("\n**Tools Called:**\n{tool_calls_text}\n")
    };

    format!(
        "{system_context}\n\
         Evaluate if the tool results provide sufficient data to answer the user's question.\n\n\
         **User Question:** {query}\n\
         {tool_calls_section}\n\
         **Results from Tools:**\n{summary_text}\n\n\
         **Evaluation Criteria:**\n\n\
         Tools return structured JSON data (entries, records, search results), NOT formatted answers.\n\n\
         Mark as ADEQUATE if:\n\
         - A tool returned relevant structured data that contains information to answer the question\n\
         - The data is relevant, even if it still needs formatting or synthesis\n\n\
         Mark as INADEQUATE only if:\n\
         - No results were returned (empty dataset)\n\
         - Results are completely irrelevant to the question\n\
         - A tool error lost critical data\n\
         - The wrong tool was called, or the date range does not match the question\n\n\
         Your job is to check if DATA exists, not if it is formatted nicely.\n\n\
         **Refinement Suggestions (only if inadequate):**\n\
         - Use a different tool or different parameters\n\
         - Add or adjust filters, translate the query, fix date bounds\n\n\
         Reply with JSON only:\n\
         {{\n  \"adequate\": true/false,\n  \"reasoning\": \"brief explanation of data availability\",\n  \
         \"refinement\": \"specific parameter changes if inadequate\"\n}}\n"
    )
}

/// Synthesis prompt: final grounded answer over the tool context.
pub fn answer_with_tools(
    system_context: &str,
    query: &str,
    context_text: &str,
    references_text: &str,
    images_text: &str,
) -> String {
    format!(
        "{system_context}\n\
         **Task:** Answer the user's question using the provided context.\n\n\
         **User Question:** {query}\n\n\
         **Context from Tools:**\n{context_text}\n\n\
         **Available Source References:**\n{references_text}\n{images_text}\n\
         **General Instructions:**\n\
         - CRITICAL: match the language of the user's question EXACTLY. The language of the \
           source documents does not matter — only the question's language\n\
         - Be concise and technical (2-4 paragraphs)\n\
         - Ground every factual claim in the provided context\n\
         - Cite sources with clickable URLs, using the domain name as link text: \
           [elog-gfa.psi.ch](URL)\n\
         - If the context is insufficient, say so clearly\n\n\
         **Formatting:**\n\
         - Math equations: wrap with two dollar signs: $$formula$$\n\
         - Images: embed inline as ![caption](url) in the relevant paragraph when the content \
           mentions them or the user asked for images; otherwise list attachments as links\n\
         - For logbook entries include date, author, category, system/domain and the entry link\n\n\
         **Answer:**\n"
    )
}

/// Direct answer prompt: no tools, conversation and files only.
pub fn answer_direct(
    system_context: &str,
    query: &str,
    history_context: &str,
    files_context: &str,
) -> String {
    format!(
        "{system_context}\n\
         **Task:** Answer this question using your knowledge, the conversation history, and any \
         uploaded files.\n\
         {history_context}{files_context}\n\
         **Current Question:** {query}\n\n\
         **Instructions:**\n\
         - CAREFULLY examine the conversation history above — it may already contain the answer\n\
         - If the user asks for complete details about something in the history, extract and \
           present that information; keep any original source citations and URLs\n\
         - CRITICAL: match the language of the user's question EXACTLY\n\
         - For math equations, wrap formulas with two dollar signs: $$formula$$\n\
         - If information is truly missing, acknowledge that you would need to search\n\n\
         **Answer:**\n"
    )
}

/// Appended to any JSON prompt on its retry after a parse failure.
pub fn strict_json_suffix() -> &'static str {
    "\n\nIMPORTANT: Your previous reply was not valid JSON. \
     Reply with ONLY the JSON object — no prose, no code fences, no explanations."
}

/// One attempted round, for the clarification message.
#[derive(Debug, Clone)]
pub struct AttemptSummary {
    pub tools:     Vec<String>,
    pub reasoning: String,
}

/// Templated clarification emitted when every refinement round came back
/// inadequate. Not an LLM prompt — this goes straight to the user.
pub fn clarification_message(query: &str, attempts: &[AttemptSummary]) -> String {
    let mut message = format!(
        "I could not find adequate information to answer: \"{}\"\n\n**What I tried:**\n",
        query
    );
    for (i, attempt) in attempts.iter().enumerate() {
        let tools = if attempt.tools.is_empty() {
            "no tools survived validation".to_string()
        } else {
            attempt.tools.join(", ")
        };
        message.push_str(&format!(
            "{}. {} — {}\n",
            i + 1,
            tools,
            attempt.reasoning
        ));
    }
    message.push_str(
        "\n**How would you like to proceed?**\n\
         - (a) Give me more specific filters (a date range, a system, a facility), or\n\
         - (b) ask me to answer from general knowledge without PSI data, or\n\
         - (c) redirect me in your own words.\n",
    );
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_template_substitution() {
        let out = apply_system_template("Tools:\n{mcp_tools_list}\nEnd", "- a: b");
        assert_eq!(out, "Tools:\n- a: b\nEnd");
        // No placeholder — template passes through untouched.
        assert_eq!(apply_system_template("plain", "- a"), "plain");
    }

    #[test]
    fn clarification_lists_attempts_and_options() {
        let attempts = vec![
            AttemptSummary {
                tools:     vec!["search_elog".to_string()],
                reasoning: "no hits for the query".to_string(),
            },
            AttemptSummary {
                tools:     vec![],
                reasoning: "selection rejected by validation".to_string(),
            },
        ];
        let message = clarification_message("quantum fluctuations in HIPA", &attempts);
        assert!(message.contains("1. search_elog — no hits for the query"));
        assert!(message.contains("2. no tools survived validation"));
        assert!(message.contains("(a)"));
        assert!(message.contains("(b)"));
        assert!(message.contains("(c)"));
    }
}
