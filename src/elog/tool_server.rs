use crate::elog::format::format_entry_for_llm;
use crate::elog::types::{ElogHit, SearchRequest};
use crate::elog::{filters, ElogCore};
use crate::error::TransportError;
use crate::mcp::ToolServer;
use crate::registry::ToolDescriptor;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// In-process tool server over the ELOG retrieval core. The agent sees
/// the same two tools a remote logbook server would expose.
pub struct ElogToolServer {
    core: Arc<ElogCore>,
}

impl ElogToolServer {
    pub const SERVER_ID: &'static str = "elog";

    pub fn new(core: Arc<ElogCore>) -> Self {
        Self { core }
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: "search_elog".to_string(),
                description: "Search the operations logbook for incidents, events and shift \
                              summaries. Supports keyword or regex queries ('.*' marks a regex), \
                              date bounds and category/system/domain filters."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query":       { "type": "string",  "description": "Keyword or regex search text" },
                        "since":       { "type": "string",  "description": "Earliest entry date, YYYY-MM-DD" },
                        "until":       { "type": "string",  "description": "Latest entry date, YYYY-MM-DD" },
                        "category":    { "type": "string",  "enum": filters::CATEGORIES },
                        "system":      { "type": "string",  "enum": filters::SYSTEMS },
                        "domain":      { "type": "string",  "enum": filters::DOMAINS },
                        "max_results": { "type": "integer", "description": "How many entries to return (1-100, default 10)" }
                    },
                    "required": []
                }),
                server_id: Self::SERVER_ID.to_string(),
            },
            ToolDescriptor {
                name: "get_elog_thread".to_string(),
                description: "Fetch a complete logbook entry together with its reply thread \
                              (ancestors and descendants)."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "message_id":      { "type": "integer", "description": "The logbook entry number" },
                        "include_replies": { "type": "boolean", "description": "Walk descendants (default true)" },
                        "include_parents": { "type": "boolean", "description": "Walk ancestors (default true)" }
                    },
                    "required": ["message_id"]
                }),
                server_id: Self::SERVER_ID.to_string(),
            },
        ]
    }

    async fn search(&self, arguments: &Value) -> Result<Value, TransportError> {
        let request: SearchRequest = serde_json::from_value(arguments.clone())
            .map_err(|e| TransportError::ToolError {
                tool:    "search_elog".to_string(),
                message: format!("bad arguments: {}", e),
            })?;

        let result = self.core.search(&request).await.map_err(|e| TransportError::ToolError {
            tool:    "search_elog".to_string(),
            message: e.to_string(),
        })?;

        Ok(json!({
            "results": {
                "hits":        result.hits.iter().map(hit_payload).collect::<Vec<_>>(),
                "total_found": result.total_found,
            },
            "aggregations": result.aggregations,
            "query_info": {
                "query":       request.query,
                "since":       request.since,
                "until":       request.until,
                "category":    request.category,
                "system":      request.system,
                "domain":      request.domain,
                "max_results": request.max_results,
            },
        }))
    }

    async fn thread(&self, arguments: &Value) -> Result<Value, TransportError> {
        let message_id = arguments
            .get("message_id")
            .and_then(Value::as_u64)
            .ok_or_else(|| TransportError::ToolError {
                tool:    "get_elog_thread".to_string(),
                message: "message_id is required".to_string(),
            })? as u32;
        let include_replies = arguments
            .get("include_replies")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let include_parents = arguments
            .get("include_parents")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let graph = self
            .core
            .thread(message_id, include_replies, include_parents)
            .await
            .map_err(|e| TransportError::ToolError {
                tool:    "get_elog_thread".to_string(),
                message: e.to_string(),
            })?;

        let root = graph.messages.iter().find(|m| m.elog_id == graph.root_id);

        Ok(json!({
            "result": {
                "thread":         graph.messages.iter().map(hit_payload).collect::<Vec<_>>(),
                "edges":          graph.edges,
                "root_message":   root.map(hit_payload),
                "total_messages": graph.total_messages,
            }
        }))
    }
}

/// A hit plus its pre-rendered markdown block.
fn hit_payload(hit: &ElogHit) -> Value {
    let mut value = serde_json::to_value(hit).unwrap_or(Value::Null);
    if let Some(map) = value.as_object_mut() {
        map.insert(
            "formatted_context".to_string(),
            Value::String(format_entry_for_llm(hit)),
        );
        // The raw html is bulky and never belongs in prompt context.
        map.remove("body_html");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elog::client::ElogClient;
    use crate::rerank::Reranker;

    fn server() -> ElogToolServer {
        // Points at nothing; the tests below only reach code paths that
        // fail before any request goes out.
        let core = Arc::new(ElogCore::new(
            Arc::new(ElogClient::new("https://elog.invalid/logbook/")),
            Arc::new(Reranker::disabled()),
        ));
        ElogToolServer::new(core)
    }

    #[tokio::test]
    async fn descriptors_carry_filter_enums() {
        let server = server();
        let tools = server.list_tools().await.unwrap();
        assert_eq!(tools.len(), 2);

        let search = tools.iter().find(|t| t.name == "search_elog").unwrap();
        let category_enum = search
            .input_schema
            .pointer("/properties/category/enum")
            .and_then(Value::as_array)
            .unwrap();
        assert!(category_enum.contains(&Value::String("Problem".to_string())));
        assert_eq!(search.server_id, ElogToolServer::SERVER_ID);

        let thread = tools.iter().find(|t| t.name == "get_elog_thread").unwrap();
        let required = thread
            .input_schema
            .pointer("/required")
            .and_then(Value::as_array)
            .unwrap();
        assert_eq!(required, &vec![Value::String("message_id".to_string())]);
    }

    #[tokio::test]
    async fn invalid_filter_is_rejected_before_any_request() {
        let server = server();
        let err = server
            .call_tool("search_elog", &json!({"query": "x", "category": "Gossip"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a known category"));
    }

    #[tokio::test]
    async fn thread_requires_a_message_id() {
        let server = server();
        let err = server
            .call_tool("get_elog_thread", &json!({"include_replies": true}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("message_id is required"));
    }

    #[tokio::test]
    async fn unknown_tool_is_refused() {
        let server = server();
        assert!(server.call_tool("post_elog", &json!({})).await.is_err());
    }
}

#[async_trait]
impl ToolServer for ElogToolServer {
    fn id(&self) -> &str {
        Self::SERVER_ID
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        Ok(self.descriptors())
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value, TransportError> {
        match name {
            "search_elog"     => self.search(arguments).await,
            "get_elog_thread" => self.thread(arguments).await,
            _ => Err(TransportError::UnknownTool(name.to_string())),
        }
    }
}
