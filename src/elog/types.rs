use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::elog::client::RawMessage;
use crate::elog::html;

/// Words of cleaned body text kept on a hit. The full body stays in
/// `body_html`; the clean text is what reaches prompts.
pub const BODY_WORD_BUDGET: usize = 500;

/// One attachment of a logbook entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url:  String,
}

/// One logbook entry, parsed and scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElogHit {
    pub elog_id:     u32,
    /// Raw timestamp string as the server sent it, e.g.
    /// "Wed, 17 Sep 2025 10:45:22 +0200".
    pub timestamp:   String,
    pub author:      String,
    pub category:    String,
    pub system:      String,
    pub domain:      String,
    pub section:     String,
    pub effect:      String,
    pub title:       String,
    pub body_html:   String,
    /// Tag-stripped, whitespace-normalized body, capped at
    /// [`BODY_WORD_BUDGET`] words.
    pub body_clean:  String,
    pub url:         String,
    pub attachments: Vec<Attachment>,
    /// Entry this one replies to.
    pub parent_id:   Option<u32>,
    /// Entries replying to this one.
    pub replies:     Vec<u32>,
    /// Cross-encoder relevance, set by the reranker. Comparable within
    /// one rerank call only.
    pub semantic_score: f32,
    /// Semantic score with the recency boost applied.
    pub final_score:    f32,
}

impl ElogHit {
    /// Build a hit from a downloaded message.
    pub fn from_raw(raw: RawMessage, entry_url: String) -> Self {
        let attr = |key: &str| raw.attributes.get(key).cloned().unwrap_or_default();

        let title = raw
            .attributes
            .get("Subject")
            .or_else(|| raw.attributes.get("Title"))
            .cloned()
            .unwrap_or_default();

        let parent_id = raw
            .attributes
            .get("In reply to")
            .and_then(|v| v.trim().parse().ok());

        let replies = raw
            .attributes
            .get("Reply to")
            .map(|v| v.split(',').filter_map(|id| id.trim().parse().ok()).collect())
            .unwrap_or_default();

        let body_clean = html::truncate_words(&html::clean_html(&raw.body), BODY_WORD_BUDGET);

        let attachments = raw
            .attachments
            .iter()
            .map(|url| Attachment {
                name: url.rsplit('/').next().unwrap_or(url).to_string(),
                url:  url.clone(),
            })
            .collect();

        Self {
            elog_id:     raw.msg_id,
            timestamp:   attr("Date"),
            author:      attr("Author"),
            category:    attr("Category"),
            system:      attr("System"),
            domain:      attr("Domain"),
            section:     attr("Section"),
            effect:      attr("Effect"),
            title,
            body_html:   raw.body,
            body_clean,
            url:         entry_url,
            attachments,
            parent_id,
            replies,
            semantic_score: 0.0,
            final_score:    0.0,
        }
    }

    /// Parsed entry timestamp, if the raw string is parseable.
    pub fn parsed_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        parse_elog_timestamp(&self.timestamp)
    }
}

/// Parse the logbook's native timestamp form
/// ("Wed, 17 Sep 2025 10:45:22 +0200", RFC 2822) with a fallback for
/// entries missing the day name or the offset.
pub fn parse_elog_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(raw) {
        return Some(ts);
    }

    // Drop a leading day name if present.
    let stripped = raw.split_once(", ").map(|(_, rest)| rest).unwrap_or(raw);
    if let Ok(ts) = DateTime::parse_from_str(stripped, "%d %b %Y %H:%M:%S %z") {
        return Some(ts);
    }
    NaiveDateTime::parse_from_str(stripped, "%d %b %Y %H:%M:%S")
        .ok()
        .and_then(|naive| naive.and_local_timezone(FixedOffset::east_opt(0)?).single())
}

/// Parse a date bound. Accepts ISO (`2025-09-17`) and the server's
/// dotted form (`17.09.2025`).
pub fn parse_date_bound(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d.%m.%Y"))
        .ok()
}

/// Search parameters of the retrieval entrypoint. Every field except
/// `max_results` is optional; at least one criterion must be present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub query:       Option<String>,
    pub since:       Option<String>,
    pub until:       Option<String>,
    pub category:    Option<String>,
    pub system:      Option<String>,
    pub domain:      Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    10
}

/// Result of one retrieval call.
#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub total_found:  usize,
    pub hits:         Vec<ElogHit>,
    pub aggregations: Aggregations,
}

/// Hit counts over the returned page, per filter attribute.
#[derive(Debug, Default, Serialize)]
pub struct Aggregations {
    pub category: HashMap<String, usize>,
    pub system:   HashMap<String, usize>,
    pub domain:   HashMap<String, usize>,
}

impl Aggregations {
    pub fn from_hits(hits: &[ElogHit]) -> Self {
        let mut agg = Self::default();
        let label = |s: &str| {
            if s.is_empty() { "Unknown".to_string() } else { s.to_string() }
        };
        for hit in hits {
            *agg.category.entry(label(&hit.category)).or_insert(0) += 1;
            *agg.system.entry(label(&hit.system)).or_insert(0) += 1;
            *agg.domain.entry(label(&hit.domain)).or_insert(0) += 1;
        }
        agg
    }
}

/// The reply graph around one entry: nodes in chronological order plus
/// parent→child edges. Loop-free by construction.
#[derive(Debug, Serialize)]
pub struct ThreadGraph {
    /// Messages sorted by timestamp ascending.
    pub messages:       Vec<ElogHit>,
    /// (parent, child) pairs among the included messages.
    pub edges:          Vec<(u32, u32)>,
    /// Oldest ancestor when parents were walked, else the queried id.
    pub root_id:        u32,
    pub total_messages: usize,
}

impl ThreadGraph {
    pub fn contains(&self, msg_id: u32) -> bool {
        self.messages.iter().any(|m| m.elog_id == msg_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_native_timestamp() {
        let ts = parse_elog_timestamp("Wed, 17 Sep 2025 10:45:22 +0200").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-09-17T10:45:22+02:00");
    }

    #[test]
    fn parses_timestamp_without_day_name() {
        assert!(parse_elog_timestamp("17 Sep 2025 10:45:22 +0200").is_some());
        assert!(parse_elog_timestamp("17 Sep 2025 10:45:22").is_some());
    }

    #[test]
    fn unparsable_timestamp_is_none() {
        assert!(parse_elog_timestamp("").is_none());
        assert!(parse_elog_timestamp("yesterday-ish").is_none());
    }

    #[test]
    fn parses_both_date_forms() {
        let iso = parse_date_bound("2025-09-17").unwrap();
        let dotted = parse_date_bound("17.09.2025").unwrap();
        assert_eq!(iso, dotted);
        assert!(parse_date_bound("Sept 17").is_none());
    }
}
