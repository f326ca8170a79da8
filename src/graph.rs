//! Knowledge-graph retrieval adapter.
//!
//! The article graph lives behind its own service; the agent consumes it
//! through the same tool seam as the logbook. This adapter owns the
//! argument normalization and the HTTP plumbing, nothing more.

use crate::error::TransportError;
use crate::mcp::ToolServer;
use crate::registry::ToolDescriptor;
use async_trait::async_trait;
use serde_json::{json, Value};

/// How articles are retrieved from the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieverMode {
    Dense,
    Sparse,
    Hybrid,
}

impl RetrieverMode {
    /// Older clients say "both" where newer ones say "hybrid"; accept
    /// either spelling and normalize.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dense"           => Some(Self::Dense),
            "sparse"          => Some(Self::Sparse),
            "hybrid" | "both" => Some(Self::Hybrid),
            ""                => Some(Self::Dense),
            _                 => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dense  => "dense",
            Self::Sparse => "sparse",
            Self::Hybrid => "hybrid",
        }
    }
}

/// Facilities the graph covers.
pub const ACCELERATORS: &[&str] = &["hipa", "proscan", "sls", "swissfel", "all"];

/// Depth bound of relationship traversal.
pub const MAX_TRAVERSAL_DEPTH: u64 = 5;

/// HTTP client of the knowledge-graph search service.
pub struct GraphClient {
    http:     reqwest::Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http:     reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Semantic search over the article graph.
    pub async fn search_knowledge(
        &self,
        query: &str,
        accelerator: Option<&str>,
        retriever: RetrieverMode,
        limit: u64,
    ) -> Result<Value, TransportError> {
        // "all" and empty mean no facility filter.
        let accelerator = accelerator.filter(|a| !a.is_empty() && *a != "all");

        let body = json!({
            "query":       query,
            "accelerator": accelerator,
            "retriever":   retriever.as_str(),
            "limit":       limit.clamp(1, 20),
        });

        self.post("search", &body).await
    }

    /// Relationship traversal from one article.
    pub async fn related_content(
        &self,
        article_id: &str,
        max_depth: u64,
    ) -> Result<Value, TransportError> {
        let body = json!({
            "article_id": article_id,
            "max_depth":  max_depth.clamp(1, MAX_TRAVERSAL_DEPTH),
        });
        self.post("related", &body).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Unavailable("accwiki".to_string(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Protocol(format!(
                "graph service returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| TransportError::Protocol(format!("bad graph payload: {}", e)))
    }
}

/// In-process tool server over the graph adapter.
pub struct GraphToolServer {
    client: GraphClient,
}

impl GraphToolServer {
    pub const SERVER_ID: &'static str = "accwiki";

    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: "search_accelerator_knowledge".to_string(),
                description: "Search the accelerator knowledge graph for documentation, \
                              procedures and technical details about the facilities."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query":       { "type": "string", "description": "Search query, without facility names" },
                        "accelerator": { "type": "string", "enum": ACCELERATORS },
                        "retriever":   { "type": "string", "enum": ["dense", "sparse", "hybrid", "both"] },
                        "limit":       { "type": "integer", "description": "Maximum results (1-20, default 5)" }
                    },
                    "required": ["query"]
                }),
                server_id: Self::SERVER_ID.to_string(),
            },
            ToolDescriptor {
                name: "get_related_content".to_string(),
                description: "Follow relationships from one knowledge-graph article to its \
                              related content."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "article_id": { "type": "string",  "description": "Article id from a prior search" },
                        "max_depth":  { "type": "integer", "description": "Traversal depth (1-5, default 2)" }
                    },
                    "required": ["article_id"]
                }),
                server_id: Self::SERVER_ID.to_string(),
            },
        ]
    }
}

#[async_trait]
impl ToolServer for GraphToolServer {
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
            "search_accelerator_knowledge" => {
                let query = arguments
                    .get("query")
                    .and_then(Value::as_str)
                    .ok_or_else(|| TransportError::ToolError {
                        tool:    name.to_string(),
                        message: "query is required".to_string(),
                    })?;
                let retriever_raw = arguments
                    .get("retriever")
                    .and_then(Value::as_str)
                    .unwrap_or("dense");
                let retriever =
                    RetrieverMode::parse(retriever_raw).ok_or_else(|| TransportError::ToolError {
                        tool:    name.to_string(),
                        message: format!("invalid retriever '{}'", retriever_raw),
                    })?;
                let accelerator = arguments.get("accelerator").and_then(Value::as_str);
                let limit = arguments.get("limit").and_then(Value::as_u64).unwrap_or(5);

                self.client
                    .search_knowledge(query, accelerator, retriever, limit)
                    .await
            }
            "get_related_content" => {
                let article_id = arguments
                    .get("article_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| TransportError::ToolError {
                        tool:    name.to_string(),
                        message: "article_id is required".to_string(),
                    })?;
                let max_depth = arguments.get("max_depth").and_then(Value::as_u64).unwrap_or(2);

                self.client.related_content(article_id, max_depth).await
            }
            _ => Err(TransportError::UnknownTool(name.to_string())),
        }
    }
}
