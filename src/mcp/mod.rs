use crate::error::TransportError;
use crate::registry::{ToolDescriptor, ToolRegistry};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub mod types;
pub mod sse;

pub use sse::SseToolServer;

/// Wall-clock cap on a single tool call, in seconds.
pub const TOOL_CALL_TIMEOUT_SECS: u64 = 30;

/// A connected tool server: something that can enumerate its tools and
/// execute one of them. Remote servers speak the streaming-event
/// protocol; the ELOG core and the graph adapter implement this trait
/// in-process so the agent consumes them identically.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Stable id of this server; descriptors carry it as their owner key.
    fn id(&self) -> &str;

    /// Perform the protocol handshake. Idempotent.
    async fn initialize(&self) -> Result<(), TransportError>;

    /// Enumerate the tools this server provides.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError>;

    /// Execute one tool and return its JSON payload.
    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value, TransportError>;
}

/// Owns the sessions to all configured tool servers and dispatches
/// calls by the descriptor's server id.
pub struct ToolRouter {
    servers: HashMap<String, Arc<dyn ToolServer>>,
}

impl ToolRouter {
    /// Connect every configured server, gather descriptors and build the
    /// session registry. A server that fails to initialize or enumerate
    /// is skipped with an error log; its tools are simply absent.
    pub async fn bootstrap(
        servers: Vec<Arc<dyn ToolServer>>,
    ) -> (Self, ToolRegistry) {
        let mut registry = ToolRegistry::new();
        let mut connected: HashMap<String, Arc<dyn ToolServer>> = HashMap::new();

        for server in servers {
            let server_id = server.id().to_string();
            if let Err(e) = server.initialize().await {
                tracing::error!(server = %server_id, error = %e, "tool server failed to initialize — skipping");
                continue;
            }
            match server.list_tools().await {
                Ok(descriptors) => {
                    tracing::info!(server = %server_id, tools = descriptors.len(), "tool server connected");
                    for mut descriptor in descriptors {
                        descriptor.server_id = server_id.clone();
                        registry.merge(descriptor);
                    }
                    connected.insert(server_id, server);
                }
                Err(e) => {
                    tracing::error!(server = %server_id, error = %e, "tool enumeration failed — skipping");
                }
            }
        }

        (Self { servers: connected }, registry)
    }

    /// Build a router over already-initialized servers. Used by tests.
    pub fn from_servers(servers: Vec<Arc<dyn ToolServer>>) -> Self {
        Self {
            servers: servers.into_iter().map(|s| (s.id().to_string(), s)).collect(),
        }
    }

    /// Dispatch one call to the server owning the named tool, bounded by
    /// the tool-call timeout.
    pub async fn call(
        &self,
        registry: &ToolRegistry,
        name: &str,
        arguments: &Value,
    ) -> Result<Value, TransportError> {
        let descriptor = registry
            .get(name)
            .ok_or_else(|| TransportError::UnknownTool(name.to_string()))?;

        let server = self
            .servers
            .get(&descriptor.server_id)
            .ok_or_else(|| {
                TransportError::Unavailable(
                    descriptor.server_id.clone(),
                    "server was not connected at bootstrap".to_string(),
                )
            })?;

        match tokio::time::timeout(
            Duration::from_secs(TOOL_CALL_TIMEOUT_SECS),
            server.call_tool(name, arguments),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(name.to_string(), TOOL_CALL_TIMEOUT_SECS)),
        }
    }
}
