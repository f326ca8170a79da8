use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Hard cap on invocations of a single tool within one turn.
pub const MAX_CALLS_PER_TOOL: usize = 3;

/// Hard cap on tool invocations across the whole turn.
pub const MAX_TOTAL_CALLS: usize = 8;

/// Why the ledger refused an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// This tool already reached its per-tool cap.
    OverToolCap,
    /// The turn already reached its total-call cap.
    OverTotalCap,
    /// An identical (tool, arguments) pair was already admitted.
    Duplicate,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RejectReason::OverToolCap  => write!(f, "per-tool call cap of {} reached", MAX_CALLS_PER_TOOL),
            RejectReason::OverTotalCap => write!(f, "total call cap of {} reached", MAX_TOTAL_CALLS),
            RejectReason::Duplicate    => write!(f, "identical call already made this turn"),
        }
    }
}

/// Per-turn bookkeeping that enforces invocation caps and rejects
/// duplicate (tool, arguments) pairs.
#[derive(Debug, Default)]
pub struct UsageLedger {
    per_tool: HashMap<String, usize>,
    seen:     HashSet<String>,
    total:    usize,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical form of an argument map, used as the duplicate key.
    /// serde_json orders object keys (BTreeMap-backed), so serializing
    /// is already canonical for our purposes.
    fn key(tool: &str, args: &Value) -> String {
        format!("{}::{}", tool, serde_json::to_string(args).unwrap_or_default())
    }

    /// Admit an invocation, recording it, or explain the refusal.
    pub fn admit(&mut self, tool: &str, args: &Value) -> Result<(), RejectReason> {
        if self.total >= MAX_TOTAL_CALLS {
            return Err(RejectReason::OverTotalCap);
        }
        let count = self.per_tool.get(tool).copied().unwrap_or(0);
        if count >= MAX_CALLS_PER_TOOL {
            return Err(RejectReason::OverToolCap);
        }
        let key = Self::key(tool, args);
        if self.seen.contains(&key) {
            return Err(RejectReason::Duplicate);
        }

        self.seen.insert(key);
        self.per_tool.insert(tool.to_string(), count + 1);
        self.total += 1;
        Ok(())
    }

    /// Total invocations admitted so far this turn.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Invocations admitted for one tool.
    pub fn count_for(&self, tool: &str) -> usize {
        self.per_tool.get(tool).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_duplicates() {
        let mut ledger = UsageLedger::new();
        let args = json!({"query": "beam dump", "max_results": 10});

        assert!(ledger.admit("search_elog", &args).is_ok());
        assert_eq!(ledger.admit("search_elog", &args), Err(RejectReason::Duplicate));
        assert_eq!(ledger.total(), 1);
    }

    #[test]
    fn per_tool_cap_enforced() {
        let mut ledger = UsageLedger::new();
        for i in 0..MAX_CALLS_PER_TOOL {
            assert!(ledger.admit("search_elog", &json!({ "q": i })).is_ok());
        }
        assert_eq!(
            ledger.admit("search_elog", &json!({ "q": 99 })),
            Err(RejectReason::OverToolCap)
        );
        // A different tool is still admissible
        assert!(ledger.admit("get_elog_thread", &json!({ "message_id": 1 })).is_ok());
    }

    #[test]
    fn total_cap_enforced() {
        let mut ledger = UsageLedger::new();
        let tools = ["a", "b", "c"];
        let mut admitted = 0;
        'outer: for tool in tools {
            for i in 0..MAX_CALLS_PER_TOOL {
                if admitted == MAX_TOTAL_CALLS {
                    break 'outer;
                }
                ledger.admit(tool, &json!({ "i": i })).unwrap();
                admitted += 1;
            }
        }
        assert_eq!(ledger.total(), MAX_TOTAL_CALLS);
        assert_eq!(ledger.admit("d", &json!({})), Err(RejectReason::OverTotalCap));
    }

    #[test]
    fn key_ignores_object_key_order() {
        let mut ledger = UsageLedger::new();
        let a = json!({"since": "2025-10-08", "query": "beam dump"});
        let b = json!({"query": "beam dump", "since": "2025-10-08"});
        assert!(ledger.admit("search_elog", &a).is_ok());
        assert_eq!(ledger.admit("search_elog", &b), Err(RejectReason::Duplicate));
    }
}
