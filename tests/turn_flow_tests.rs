//! End-to-end tests of the turn state machine.
//!
//! All tests use `MockChatClient` and an in-process mock tool server —
//! no network calls are made. Run with: `cargo test`

use accel_assist::error::TransportError;
use accel_assist::ledger::{MAX_CALLS_PER_TOOL, MAX_TOTAL_CALLS};
use accel_assist::mcp::{ToolRouter, ToolServer};
use accel_assist::llm::MockChatClient;
use accel_assist::registry::{ToolDescriptor, ToolRegistry};
use accel_assist::types::TurnSignal;
use accel_assist::{AgentError, TurnBuilder, TurnEngine};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

// ─────────────────────────────────────────────────────────────────────────────
// Test helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Tool server whose every tool answers with one canned payload.
struct MockToolServer {
    server_id: String,
    tools:     Vec<ToolDescriptor>,
    responses: HashMap<String, Value>,
    calls:     Mutex<Vec<(String, Value)>>,
}

impl MockToolServer {
    fn new(server_id: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            tools:     Vec::new(),
            responses: HashMap::new(),
            calls:     Mutex::new(Vec::new()),
        }
    }

    fn tool(mut self, descriptor: ToolDescriptor, response: Value) -> Self {
        self.responses.insert(descriptor.name.clone(), response);
        self.tools.push(descriptor);
        self
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolServer for MockToolServer {
    fn id(&self) -> &str {
        &self.server_id
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push((name.to_string(), arguments.clone()));
        self.responses
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::UnknownTool(name.to_string()))
    }
}

fn elog_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name:        "search_elog".to_string(),
        description: "Search the operations logbook".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "query":       { "type": "string" },
                "since":       { "type": "string" },
                "until":       { "type": "string" },
                "system":      { "type": "string" },
                "max_results": { "type": "integer" }
            },
            "required": []
        }),
        server_id: "elog".to_string(),
    }
}

fn accwiki_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name:        "search_accelerator_knowledge".to_string(),
        description: "Search the accelerator knowledge graph".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "query":       { "type": "string" },
                "accelerator": { "type": "string", "enum": ["hipa", "proscan", "sls", "swissfel", "all"] },
                "retriever":   { "type": "string", "enum": ["dense", "sparse", "hybrid"] },
                "limit":       { "type": "integer" }
            },
            "required": ["query"]
        }),
        server_id: "accwiki".to_string(),
    }
}

fn elog_hits_payload(count: usize) -> Value {
    let hits: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "elog_id": 8880 + i,
                "title": format!("Beam dump event {}", i + 1),
                "url": format!("https://elog-gfa.psi.ch/SwissFEL+commissioning/{}", 8880 + i),
                "category": "Problem",
                "formatted_context": format!("### ELOG Entry #{}: Beam dump event {}", 8880 + i, i + 1)
            })
        })
        .collect();
    json!({ "results": { "hits": hits, "total_found": count } })
}

async fn engine_with(
    query: &str,
    llm: Arc<MockChatClient>,
    servers: Vec<Arc<dyn ToolServer>>,
) -> TurnEngine {
    let (router, registry) = ToolRouter::bootstrap(servers).await;
    TurnBuilder::new(query)
        .llm(llm)
        .session(Arc::new(router), Arc::new(registry))
        .build()
        .await
        .expect("builder should succeed")
}

fn urls_in(text: &str) -> Vec<String> {
    text.split(|c: char| c == '(' || c == ')' || c.is_whitespace())
        .filter(|part| part.starts_with("https://") || part.starts_with("http://"))
        .map(|part| part.trim_end_matches(['.', ',', ';']).to_string())
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 1: general knowledge — no tools, no citations
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn general_knowledge_query_answers_directly() {
    let llm = Arc::new(MockChatClient::replies(vec![
        r#"{"needs_tools": false, "reasoning": "conversational greeting"}"#,
        "Hello! I can search the operations logbook and the accelerator knowledge base for you.",
    ]));
    let server = Arc::new(MockToolServer::new("elog").tool(elog_descriptor(), json!({})));
    let mut engine = engine_with("Hello, what can you do?", llm.clone(), vec![server as Arc<dyn ToolServer>]).await;

    let answer = engine.run(None).await.unwrap();

    assert!(answer.contains("operations logbook"));
    assert!(urls_in(&answer).is_empty(), "direct answers carry no citations");
    assert_eq!(llm.call_count(), 2, "one decision call, one answer call");
    assert!(engine.memory.log.invocations().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 2: single-tool ELOG flow with citation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_tool_elog_flow_cites_logged_url() {
    let llm = Arc::new(MockChatClient::replies(vec![
        r#"{"needs_tools": true, "reasoning": "operational events need the logbook"}"#,
        r#"{"tools": [{"tool_name": "search_elog",
                      "arguments": {"query": "beam dump", "since": "2025-10-08", "until": "2025-10-15"},
                      "reasoning": "recent beam dump events"}]}"#,
        r#"{"adequate": true, "reasoning": "seven relevant entries found"}"#,
        "Seven beam dump events were recorded last week, see \
         [elog-gfa.psi.ch](https://elog-gfa.psi.ch/SwissFEL+commissioning/8880).",
    ]));
    let server = Arc::new(MockToolServer::new("elog").tool(elog_descriptor(), elog_hits_payload(7)));
    let mut engine = engine_with("beam dump events last week", llm.clone(), vec![server.clone() as Arc<dyn ToolServer>]).await;

    let answer = engine.run(None).await.unwrap();

    assert_eq!(server.call_count(), 1);
    let (tool, args) = &server.calls()[0];
    assert_eq!(tool, "search_elog");
    assert_eq!(args["since"], "2025-10-08");

    // Every citation resolves to a URL the execution log knows.
    let cited = urls_in(&answer);
    assert!(!cited.is_empty());
    for url in &cited {
        assert!(
            engine.memory.log.known_urls().contains(url),
            "citation {} not present in execution log",
            url
        );
    }

    assert_eq!(engine.memory.ledger.total(), 1);
    assert_eq!(engine.memory.iteration, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 3: refinement carries the evaluator's hint into reselection
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn refinement_hint_reaches_second_selection() {
    let llm = Arc::new(MockChatClient::replies(vec![
        r#"{"needs_tools": true, "reasoning": "facility question"}"#,
        r#"{"tools": [{"tool_name": "search_accelerator_knowledge",
                      "arguments": {"query": "Skew Quadrupole beam size", "accelerator": "sls"},
                      "reasoning": "SLS documentation"}]}"#,
        r#"{"adequate": false, "reasoning": "results in wrong language",
            "refinement": "translate the query to German"}"#,
        r#"{"tools": [{"tool_name": "search_accelerator_knowledge",
                      "arguments": {"query": "Skew Quadrupol Strahlgröße", "accelerator": "sls"},
                      "reasoning": "German source material"}]}"#,
        r#"{"adequate": true, "reasoning": "German articles found"}"#,
        "The skew quadrupole affects the vertical beam size at SLS, see \
         [accwiki.psi.ch](https://accwiki.psi.ch/sls/skew-quadrupole).",
    ]));
    let server = Arc::new(MockToolServer::new("accwiki").tool(
        accwiki_descriptor(),
        json!({
            "results": [{
                "title": "Skew Quadrupol",
                "url": "https://accwiki.psi.ch/sls/skew-quadrupole",
                "content": "Strahlgröße..."
            }]
        }),
    ));
    let mut engine = engine_with("Skew Quadrupole beam size at SLS", llm.clone(), vec![server.clone() as Arc<dyn ToolServer>]).await;

    let answer = engine.run(None).await.unwrap();

    assert!(answer.contains("accwiki.psi.ch"));
    assert_eq!(engine.memory.iteration, 1, "one refinement cycle");
    assert_eq!(server.call_count(), 2);
    assert_eq!(server.calls()[1].1["query"], "Skew Quadrupol Strahlgröße");

    // The second selection prompt carried the refinement hint.
    let second_select_prompt = llm.prompt_for_call(3).unwrap();
    assert!(second_select_prompt.contains("translate the query to German"));
    assert!(second_select_prompt.contains("Previous Attempt #1 Failed"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 4: multi-tool plan executes both in one round
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn multi_tool_plan_runs_both_and_merges_references() {
    let llm = Arc::new(MockChatClient::replies(vec![
        r#"{"needs_tools": true, "reasoning": "needs documentation and recent logs"}"#,
        r#"{"tools": [
              {"tool_name": "search_accelerator_knowledge",
               "arguments": {"query": "RF system overview", "accelerator": "swissfel"},
               "reasoning": "system documentation"},
              {"tool_name": "search_elog",
               "arguments": {"system": "RF", "since": "2025-09-15"},
               "reasoning": "recent RF problems"}
           ]}"#,
        r#"{"adequate": true, "reasoning": "both sources returned relevant data"}"#,
        "The SwissFEL RF system consists of C-band stations \
         ([accwiki.psi.ch](https://accwiki.psi.ch/swissfel/rf)); recent trips are logged in \
         [elog-gfa.psi.ch](https://elog-gfa.psi.ch/SwissFEL+commissioning/8880).",
    ]));

    let accwiki = Arc::new(MockToolServer::new("accwiki").tool(
        accwiki_descriptor(),
        json!({
            "results": [{ "title": "RF system", "url": "https://accwiki.psi.ch/swissfel/rf", "content": "..." }]
        }),
    ));
    let elog = Arc::new(MockToolServer::new("elog").tool(elog_descriptor(), elog_hits_payload(3)));

    let mut engine = engine_with(
        "Explain SwissFEL RF system and recent problems",
        llm,
        vec![accwiki.clone() as Arc<dyn ToolServer>, elog.clone() as Arc<dyn ToolServer>],
    )
    .await;

    let answer = engine.run(None).await.unwrap();

    assert_eq!(accwiki.call_count(), 1);
    assert_eq!(elog.call_count(), 1);
    assert_eq!(engine.memory.results.len(), 2);

    let plan = engine.memory.plan.as_ref().unwrap();
    assert_eq!(plan.strategy, accel_assist::PlanStrategy::MultiTool);
    assert_eq!(plan.steps[0].invocations.len(), 2);

    // Results and the invocation log keep submission order regardless of
    // completion order.
    let logged: Vec<String> = engine
        .memory
        .log
        .invocations()
        .iter()
        .map(|i| i.tool.clone())
        .collect();
    assert_eq!(logged, vec!["search_accelerator_knowledge", "search_elog"]);

    for url in urls_in(&answer) {
        assert!(engine.memory.log.known_urls().contains(&url));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 5: exhaustion ends in a clarification, never weak synthesis
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn exhausted_iterations_ask_the_user() {
    let select = |query: &str| {
        format!(
            r#"{{"tools": [{{"tool_name": "search_elog", "arguments": {{"query": "{}"}},
                 "reasoning": "searching"}}]}}"#,
            query
        )
    };
    let inadequate = |hint: &str| {
        format!(
            r#"{{"adequate": false, "reasoning": "no relevant hits", "refinement": "{}"}}"#,
            hint
        )
    };
    let llm = Arc::new(MockChatClient::replies(vec![
        r#"{"needs_tools": true, "reasoning": "sounds operational"}"#,
        &select("quantum multiverse fluctuations"),
        &inadequate("try the HIPA domain filter"),
        &select("multiverse HIPA"),
        &inadequate("broaden the date range"),
        &select("fluctuations HIPA 2020-2025"),
        &inadequate("nothing left to try"),
        // No synthesis call may follow.
    ]));
    let server = Arc::new(MockToolServer::new("elog").tool(
        elog_descriptor(),
        json!({ "results": { "hits": [], "total_found": 0 } }),
    ));
    let mut engine = engine_with("Quantum multiverse fluctuations in HIPA", llm.clone(), vec![server.clone() as Arc<dyn ToolServer>]).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let answer = engine.run(Some(&tx)).await.unwrap();

    // Three execute/evaluate rounds, two refinement cycles, then the
    // clarification.
    assert_eq!(server.call_count(), 3);
    assert_eq!(engine.memory.iteration, 2);
    assert!(engine.memory.iteration < engine.memory.config.max_iterations);
    assert_eq!(engine.memory.attempts.len(), 3);

    assert!(answer.contains("What I tried"));
    assert!(answer.contains("1. search_elog"));
    assert!(answer.contains("3. search_elog"));
    assert!(answer.contains("(b)"));

    let mut saw_clarification = false;
    while let Ok(signal) = rx.try_recv() {
        if matches!(signal, TurnSignal::ClarificationPrompt(_)) {
            saw_clarification = true;
        }
        assert!(
            !matches!(signal, TurnSignal::StreamedToken(_)),
            "no synthesis may stream after exhaustion"
        );
    }
    assert!(saw_clarification);
    assert_eq!(llm.call_count(), 7, "no synthesis call after the last evaluation");
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 6: the usage ledger drops duplicate invocations
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_selections_execute_once() {
    let duplicate = r#"{"tool_name": "search_elog", "arguments": {"query": "beam dump"}, "reasoning": "again"}"#;
    let selection = format!(
        r#"{{"tools": [{d}, {d}, {d}, {d}]}}"#,
        d = duplicate
    );
    let llm = Arc::new(MockChatClient::replies(vec![
        r#"{"needs_tools": true, "reasoning": "operational"}"#,
        &selection,
        r#"{"adequate": true, "reasoning": "hits found"}"#,
        "Beam dumps summarized: [elog-gfa.psi.ch](https://elog-gfa.psi.ch/SwissFEL+commissioning/8880).",
    ]));
    let server = Arc::new(MockToolServer::new("elog").tool(elog_descriptor(), elog_hits_payload(2)));
    let mut engine = engine_with("beam dumps", llm, vec![server.clone() as Arc<dyn ToolServer>]).await;

    engine.run(None).await.unwrap();

    assert_eq!(server.call_count(), 1, "duplicates must not reach the transport");
    assert_eq!(engine.memory.ledger.total(), 1);
    assert_eq!(engine.memory.rejected.len(), 3);
    for (_, reason) in &engine.memory.rejected {
        assert!(reason.contains("identical call"));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Invariants and boundaries
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ledger_caps_bound_every_turn() {
    // Ten distinct selections for one tool: the per-tool cap admits
    // three, the rest are dropped before execution.
    let selections: Vec<String> = (0..10)
        .map(|i| {
            format!(
                r#"{{"tool_name": "search_elog", "arguments": {{"query": "q{}"}}, "reasoning": "r"}}"#,
                i
            )
        })
        .collect();
    let plan = format!(r#"{{"tools": [{}]}}"#, selections.join(", "));
    let llm = Arc::new(MockChatClient::replies(vec![
        r#"{"needs_tools": true, "reasoning": "operational"}"#,
        &plan,
        r#"{"adequate": true, "reasoning": "fine"}"#,
        "Done: [elog-gfa.psi.ch](https://elog-gfa.psi.ch/SwissFEL+commissioning/8880).",
    ]));
    let server = Arc::new(MockToolServer::new("elog").tool(elog_descriptor(), elog_hits_payload(1)));
    let mut engine = engine_with("lots of searching", llm, vec![server.clone() as Arc<dyn ToolServer>]).await;

    engine.run(None).await.unwrap();

    assert_eq!(server.call_count(), MAX_CALLS_PER_TOOL);
    assert!(engine.memory.ledger.total() <= MAX_TOTAL_CALLS);
    assert_eq!(engine.memory.ledger.count_for("search_elog"), MAX_CALLS_PER_TOOL);
}

#[tokio::test]
async fn tools_disabled_skips_the_whole_planning_loop() {
    let llm = Arc::new(MockChatClient::replies(vec![
        "Answered purely from conversation context.",
    ]));
    let server = Arc::new(MockToolServer::new("elog").tool(elog_descriptor(), json!({})));
    let (router, registry) = ToolRouter::bootstrap(vec![server.clone() as Arc<dyn ToolServer>]).await;

    let mut engine = TurnBuilder::new("what did I just ask?")
        .llm(llm.clone())
        .session(Arc::new(router), Arc::new(registry))
        .tools_enabled(false)
        .build()
        .await
        .unwrap();

    let answer = engine.run(None).await.unwrap();

    assert!(answer.contains("conversation context"));
    assert_eq!(llm.call_count(), 1, "no decision, selection, or evaluation calls");
    assert_eq!(server.call_count(), 0);
}

#[tokio::test]
async fn empty_registry_with_tools_enabled_is_a_misconfiguration() {
    let llm = Arc::new(MockChatClient::replies(vec!["unused"]));
    let result = TurnBuilder::new("anything")
        .llm(llm)
        .session(Arc::new(ToolRouter::from_servers(vec![])), Arc::new(ToolRegistry::new()))
        .build()
        .await;

    assert!(matches!(result, Err(AgentError::EmptyRegistry)));
}

#[tokio::test]
async fn malformed_decision_defaults_to_tools() {
    let llm = Arc::new(MockChatClient::replies(vec![
        "I think tools would be nice.",          // not JSON
        "still not json, sorry",                 // strict retry also fails
        r#"{"tools": []}"#,                      // selection: nothing
        // Empty execution round -> evaluate is skipped LLM-wise
        // (inadequate by construction) -> refine -> select again.
        r#"{"tools": []}"#,
        r#"{"tools": []}"#,
    ]));
    let server = Arc::new(MockToolServer::new("elog").tool(elog_descriptor(), json!({})));
    let mut engine = engine_with("hmm", llm, vec![server as Arc<dyn ToolServer>]).await;

    let answer = engine.run(None).await.unwrap();

    // Defaulted to needs_tools=true, every round selected nothing, the
    // turn ends asking the user instead of hallucinating.
    assert!(engine.memory.needs_tools);
    assert!(answer.contains("What I tried"));
}

#[tokio::test]
async fn canceled_turn_emits_terminal_signal() {
    let llm = Arc::new(MockChatClient::replies(vec![r#"{"needs_tools": false}"#, "never"]));
    let server = Arc::new(MockToolServer::new("elog").tool(elog_descriptor(), json!({})));
    let (router, registry) = ToolRouter::bootstrap(vec![server as Arc<dyn ToolServer>]).await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut engine = TurnBuilder::new("hello")
        .llm(llm)
        .session(Arc::new(router), Arc::new(registry))
        .cancel_token(cancel)
        .build()
        .await
        .unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let result = engine.run(Some(&tx)).await;

    assert!(matches!(result, Err(AgentError::Canceled)));
    let mut saw_canceled = false;
    while let Ok(signal) = rx.try_recv() {
        if matches!(signal, TurnSignal::Canceled) {
            saw_canceled = true;
        }
    }
    assert!(saw_canceled);
}

#[tokio::test]
async fn streaming_surface_yields_tokens_then_ends() {
    let llm = Arc::new(MockChatClient::replies(vec![
        r#"{"needs_tools": false, "reasoning": "greeting"}"#,
        "Hello there, operator.",
    ]));
    let server = Arc::new(MockToolServer::new("elog").tool(elog_descriptor(), json!({})));
    let (router, registry) = ToolRouter::bootstrap(vec![server as Arc<dyn ToolServer>]).await;

    let engine = TurnBuilder::new("hi")
        .llm(llm)
        .session(Arc::new(router), Arc::new(registry))
        .build()
        .await
        .unwrap();

    let signals: Vec<TurnSignal> = engine.run_streaming().collect().await;

    let streamed: String = signals
        .iter()
        .filter_map(|s| match s {
            TurnSignal::StreamedToken(t) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "Hello there, operator.");
    assert!(signals.iter().any(|s| matches!(s, TurnSignal::StepStarted { .. })));
    assert!(!signals.iter().any(|s| matches!(s, TurnSignal::Error(_))));
}

#[tokio::test]
async fn schema_violations_are_dropped_with_reasons() {
    let llm = Arc::new(MockChatClient::replies(vec![
        r#"{"needs_tools": true, "reasoning": "operational"}"#,
        // Three selections: unknown tool, illegal enum, and one valid.
        r#"{"tools": [
              {"tool_name": "launch_beam", "arguments": {}, "reasoning": "?"},
              {"tool_name": "search_accelerator_knowledge",
               "arguments": {"query": "rf", "accelerator": "cern"}, "reasoning": "wrong enum"},
              {"tool_name": "search_accelerator_knowledge",
               "arguments": {"query": "rf", "accelerator": "swissfel"}, "reasoning": "ok"}
           ]}"#,
        r#"{"adequate": true, "reasoning": "data found"}"#,
        "RF overview: [accwiki.psi.ch](https://accwiki.psi.ch/swissfel/rf).",
    ]));
    let server = Arc::new(MockToolServer::new("accwiki").tool(
        accwiki_descriptor(),
        json!({ "results": [{ "title": "RF", "url": "https://accwiki.psi.ch/swissfel/rf", "content": "..." }] }),
    ));
    let mut engine = engine_with("rf question", llm, vec![server.clone() as Arc<dyn ToolServer>]).await;

    engine.run(None).await.unwrap();

    assert_eq!(server.call_count(), 1, "only the valid selection executes");
    assert_eq!(engine.memory.rejected.len(), 2);
    assert!(engine.memory.rejected[0].1.contains("not in the registry"));
    assert!(engine.memory.rejected[1].1.contains("not a legal value"));
}
