use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One recorded fact about a turn: a state entered, a tool invoked,
/// a selection rejected, an evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub iteration: usize,
    pub state:     String,
    pub event:     String,
    pub data:      String,
    pub timestamp: DateTime<Utc>,
}

/// A completed tool invocation, kept with its frozen argument map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub iteration:  usize,
    pub tool:       String,
    pub arguments:  Value,
    pub success:    bool,
    pub error:      Option<String>,
    pub latency_ms: u64,
    pub timestamp:  DateTime<Utc>,
}

/// Ordered execution log of one turn. Invocations are appended in
/// submission order so that prompt composition stays deterministic.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ExecutionLog {
    entries:     Vec<LogEntry>,
    invocations: Vec<ToolInvocationRecord>,
    /// URLs surfaced by tool results; the reference list of the
    /// synthesized answer must draw from this set.
    cited_urls:  Vec<String>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, iteration: usize, state: &str, event: &str, data: &str) {
        tracing::debug!(state, event, data, iteration, "turn trace");
        self.entries.push(LogEntry {
            iteration,
            state:     state.to_string(),
            event:     event.to_string(),
            data:      data.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn record_invocation(&mut self, record: ToolInvocationRecord) {
        self.invocations.push(record);
    }

    pub fn record_url(&mut self, url: impl Into<String>) {
        let url = url.into();
        if !url.is_empty() && !self.cited_urls.contains(&url) {
            self.cited_urls.push(url);
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn invocations(&self) -> &[ToolInvocationRecord] {
        &self.invocations
    }

    pub fn known_urls(&self) -> &[String] {
        &self.cited_urls
    }

    /// Tool names invoked this turn, deduplicated, in first-use order.
    pub fn tools_tried(&self) -> Vec<String> {
        let mut names = Vec::new();
        for inv in &self.invocations {
            if !names.contains(&inv.tool) {
                names.push(inv.tool.clone());
            }
        }
        names
    }

    /// All entries recorded under a given state name.
    pub fn for_state(&self, state: &str) -> Vec<&LogEntry> {
        self.entries.iter().filter(|e| e.state == state).collect()
    }

    /// Serializes the full log to a pretty-printed JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.entries).unwrap_or_else(|_| "[]".to_string())
    }
}
