use crate::error::TransportError;
use crate::mcp::types::*;
use crate::mcp::ToolServer;
use crate::registry::ToolDescriptor;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// Reconnect back-off schedule. After the last attempt fails the server
/// is reported unavailable for this call; the next call starts over.
const RECONNECT_BACKOFF_MS: [u64; 3] = [100, 400, 1600];

/// A tool server reached over a server-sent-event session: requests go
/// out as HTTP POSTs, responses arrive on a long-lived event stream.
///
/// The session is opened lazily and reused across turns. When the event
/// stream drops, the next call reconnects with exponential back-off.
pub struct SseToolServer {
    server_id:  String,
    events_url: String,
    post_url:   String,
    http:       reqwest::Client,
    next_id:    AtomicU64,
    pending:    Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
    reader:     Mutex<Option<JoinHandle<()>>>,
}

impl SseToolServer {
    /// `base_url` example: "http://elog-tools:8080". The event stream is
    /// served at `/sse`, requests are posted to `/messages`.
    pub fn new(server_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base = base_url.into();
        let base = base.trim_end_matches('/').to_string();
        Self {
            server_id:  server_id.into(),
            events_url: format!("{}/sse", base),
            post_url:   format!("{}/messages", base),
            http:       reqwest::Client::new(),
            next_id:    AtomicU64::new(1),
            pending:    Arc::new(Mutex::new(HashMap::new())),
            reader:     Mutex::new(None),
        }
    }

    /// Open the event stream and spawn the reader task that resolves
    /// pending requests. Returns once the stream is established.
    async fn connect(&self) -> Result<JoinHandle<()>, TransportError> {
        let response = self
            .http
            .get(&self.events_url)
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(self.server_id.clone(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Unavailable(
                self.server_id.clone(),
                format!("event stream returned {}", response.status()),
            ));
        }

        let pending = Arc::clone(&self.pending);
        let server_id = self.server_id.clone();
        let handle = tokio::spawn(async move {
            let mut events = response.bytes_stream().eventsource();
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => {
                        if event.data.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(&event.data) {
                            Ok(response) => {
                                if let Some(id) = response.id.as_u64() {
                                    if let Some(tx) = pending.lock().await.remove(&id) {
                                        let _ = tx.send(response);
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::debug!(server = %server_id, error = %e, "non-response event ignored");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(server = %server_id, error = %e, "event stream error — session dropped");
                        break;
                    }
                }
            }
            // Unblock every caller still waiting on this session.
            pending.lock().await.clear();
        });

        Ok(handle)
    }

    /// Make sure a live session exists, reconnecting with back-off if the
    /// previous one dropped. Gives up after the back-off schedule.
    async fn ensure_connected(&self) -> Result<(), TransportError> {
        let mut reader = self.reader.lock().await;
        if let Some(handle) = reader.as_ref() {
            if !handle.is_finished() {
                return Ok(());
            }
        }

        // One immediate attempt, then one retry per back-off step; the
        // third backed-off failure reports the server unavailable.
        let mut last_err = match self.connect().await {
            Ok(handle) => {
                *reader = Some(handle);
                return Ok(());
            }
            Err(e) => e,
        };

        for (attempt, backoff_ms) in RECONNECT_BACKOFF_MS.iter().enumerate() {
            tokio::time::sleep(Duration::from_millis(*backoff_ms)).await;
            match self.connect().await {
                Ok(handle) => {
                    tracing::info!(server = %self.server_id, attempt, "session re-established");
                    *reader = Some(handle);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(server = %self.server_id, attempt, error = %e, "reconnect attempt failed");
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    /// Send one request on the session and await its response event.
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.ensure_connected().await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method:  method.to_string(),
            params:  Some(params),
            id:      json!(id),
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let posted = match self.http.post(&self.post_url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(TransportError::Unavailable(self.server_id.clone(), e.to_string()));
            }
        };

        if !posted.status().is_success() {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::Protocol(format!(
                "request POST returned {}",
                posted.status()
            )));
        }

        let response = rx.await.map_err(|_| {
            TransportError::Unavailable(self.server_id.clone(), "session closed mid-request".to_string())
        })?;

        if let Some(err) = response.error {
            return Err(TransportError::Protocol(err.message));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_derive_from_base_url() {
        let server = SseToolServer::new("elog", "http://tools.example:8080/");
        assert_eq!(server.events_url, "http://tools.example:8080/sse");
        assert_eq!(server.post_url, "http://tools.example:8080/messages");
        assert_eq!(server.id(), "elog");
    }

    #[tokio::test]
    async fn unreachable_server_reports_unavailable_after_backoff() {
        // Port 9 (discard) is closed on test hosts; every connect
        // attempt is refused and the back-off schedule runs out.
        let server = SseToolServer::new("elog", "http://127.0.0.1:9");
        let err = server.initialize().await.unwrap_err();
        assert!(matches!(err, TransportError::Unavailable(_, _)));
    }
}

#[async_trait]
impl ToolServer for SseToolServer {
    fn id(&self) -> &str {
        &self.server_id
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        let client_info = ClientInfo {
            name:    "accel-assist".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let params = json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": client_info,
        });
        self.request("initialize", params).await?;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        let result = self.request("tools/list", json!({})).await?;
        let listed: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| TransportError::Protocol(format!("bad tools/list payload: {}", e)))?;

        Ok(listed
            .tools
            .into_iter()
            .map(|t| ToolDescriptor {
                name:         t.name,
                description:  t.description.unwrap_or_default(),
                input_schema: t.input_schema.unwrap_or_else(|| json!({"type": "object"})),
                server_id:    self.server_id.clone(),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value, TransportError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.request("tools/call", params).await?;

        let call_result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| TransportError::Protocol(format!("bad tools/call payload: {}", e)))?;

        let mut text = String::new();
        for content in call_result.content {
            if let WireContent::Text { text: t } = content {
                text.push_str(&t);
            }
        }

        if call_result.is_error {
            return Err(TransportError::ToolError {
                tool:    name.to_string(),
                message: text,
            });
        }

        // Tool payloads are JSON documents serialized into the text
        // content block.
        serde_json::from_str(&text)
            .map_err(|e| TransportError::Protocol(format!("tool '{}' returned non-JSON: {}", name, e)))
    }
}
