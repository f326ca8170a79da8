use crate::elog::client::ElogClient;
use crate::elog::types::*;
use crate::error::ElogError;
use crate::rerank::{CandidateDoc, Reranker};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

pub mod client;
pub mod filters;
pub mod format;
pub mod html;
pub mod types;

mod tool_server;

pub use tool_server::ElogToolServer;

/// Size of the bulk-read worker pool.
pub const PARALLEL_READERS: usize = 10;

/// Upper bound on ids fetched from the server per search.
const FETCH_CAP: usize = 200;

/// Search and thread-navigation service over the facility logbook.
///
/// The logbook's own date filter is unreliable, so searches oversample,
/// read entries in parallel, post-filter by the parsed timestamps and
/// rerank client-side.
pub struct ElogCore {
    client:   Arc<ElogClient>,
    reranker: Arc<Reranker>,
}

impl ElogCore {
    pub fn new(client: Arc<ElogClient>, reranker: Arc<Reranker>) -> Self {
        Self { client, reranker }
    }

    /// Single search entrypoint.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResult, ElogError> {
        Self::validate(request)?;

        let query = request.query.as_deref().unwrap_or("").trim().to_string();
        // `.*` marks an explicit regex; anything else is a keyword search.
        // The server applies the same substring scan either way, the flag
        // only drives logging and downstream relevance treatment.
        let is_regex = query.contains(".*");

        let mut filter = HashMap::new();
        if let Some(category) = &request.category {
            filter.insert("Category".to_string(), category.clone());
        }
        if let Some(system) = &request.system {
            filter.insert("System".to_string(), system.clone());
        }
        if let Some(domain) = &request.domain {
            filter.insert("Domain".to_string(), domain.clone());
        }
        if !query.is_empty() {
            filter.insert("subtext".to_string(), query.clone());
        }

        // Oversample: date filtering happens after the fetch, and the
        // reranker needs slack to pick from.
        let fetch_budget = (3 * request.max_results).max(20).min(FETCH_CAP);

        tracing::info!(
            query = %query,
            regex = is_regex,
            since = request.since.as_deref().unwrap_or("-"),
            until = request.until.as_deref().unwrap_or("-"),
            fetch_budget,
            "logbook search"
        );

        let ids = self.client.search(&filter, fetch_budget).await?;
        let total_found = ids.len();

        let mut hits = self.bulk_read(&ids).await;

        if request.since.is_some() || request.until.is_some() {
            hits = filter_by_date_range(hits, request.since.as_deref(), request.until.as_deref());
        }
        hits.sort_by(sort_newest_first);

        let hits = self.rerank(&query, hits, request.max_results).await;
        let aggregations = Aggregations::from_hits(&hits);

        Ok(SearchResult { total_found, hits, aggregations })
    }

    /// Fan one read per id across the worker pool. Failed reads are
    /// dropped with a warning; they never abort the batch.
    async fn bulk_read(&self, ids: &[u32]) -> Vec<ElogHit> {
        let results: Vec<Option<ElogHit>> = stream::iter(ids.iter().copied())
            .map(|id| async move {
                match self.read_and_parse(id).await {
                    Ok(hit) => Some(hit),
                    Err(e) => {
                        tracing::warn!(msg_id = id, error = %e, "failed to read logbook entry");
                        None
                    }
                }
            })
            .buffer_unordered(PARALLEL_READERS)
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }

    /// Read and parse one entry.
    pub async fn read_and_parse(&self, msg_id: u32) -> Result<ElogHit, ElogError> {
        let raw = self.client.read(msg_id).await?;
        Ok(ElogHit::from_raw(raw, self.client.message_url(msg_id)))
    }

    async fn rerank(&self, query: &str, hits: Vec<ElogHit>, k: usize) -> Vec<ElogHit> {
        if hits.is_empty() {
            return hits;
        }

        let docs: Vec<CandidateDoc> = hits
            .iter()
            .map(|hit| CandidateDoc {
                text:      format!("{} {}", hit.title, hit.body_clean),
                timestamp: hit.parsed_timestamp(),
                category:  hit.category.clone(),
            })
            .collect();

        let ranked = self.reranker.rank(query, &docs, k).await;

        let mut picked = Vec::with_capacity(ranked.len());
        let mut taken: HashSet<usize> = HashSet::new();
        for r in ranked {
            if taken.insert(r.index) {
                let mut hit = hits[r.index].clone();
                hit.semantic_score = r.semantic;
                hit.final_score = r.final_score;
                picked.push(hit);
            }
        }
        picked
    }

    /// Assemble the reply graph around one entry.
    ///
    /// Ancestors are walked to the root when requested; descendants are
    /// collected breadth-first. A visited set guards against reply
    /// cycles, which the server should make impossible.
    pub async fn thread(
        &self,
        message_id: u32,
        include_replies: bool,
        include_parents: bool,
    ) -> Result<ThreadGraph, ElogError> {
        let origin = self.read_and_parse(message_id).await?;

        let mut visited: HashSet<u32> = HashSet::new();
        visited.insert(message_id);
        let mut messages = vec![origin.clone()];
        let mut root_id = message_id;

        if include_parents {
            let mut parent_id = origin.parent_id;
            while let Some(pid) = parent_id {
                if !visited.insert(pid) {
                    tracing::warn!(msg_id = pid, "reply cycle detected in parent chain — stopping");
                    break;
                }
                match self.read_and_parse(pid).await {
                    Ok(parent) => {
                        root_id = parent.elog_id;
                        parent_id = parent.parent_id;
                        messages.push(parent);
                    }
                    Err(e) => {
                        tracing::warn!(msg_id = pid, error = %e, "failed to traverse parent chain");
                        break;
                    }
                }
            }
        }

        if include_replies {
            let mut queue: VecDeque<Vec<u32>> = VecDeque::new();
            queue.push_back(origin.replies.clone());
            while let Some(reply_ids) = queue.pop_front() {
                for rid in reply_ids {
                    if !visited.insert(rid) {
                        continue;
                    }
                    match self.read_and_parse(rid).await {
                        Ok(reply) => {
                            queue.push_back(reply.replies.clone());
                            messages.push(reply);
                        }
                        Err(e) => {
                            tracing::warn!(msg_id = rid, error = %e, "failed to read reply");
                        }
                    }
                }
            }
        }

        Ok(finalize_thread(messages, root_id))
    }

    fn validate(request: &SearchRequest) -> Result<(), ElogError> {
        if let Some(category) = &request.category {
            if !filters::validate_filter("Category", category) {
                return Err(ElogError::InvalidFilter(format!(
                    "'{}' is not a known category", category
                )));
            }
        }
        if let Some(system) = &request.system {
            if !filters::validate_filter("System", system) {
                return Err(ElogError::InvalidFilter(format!(
                    "'{}' is not a known system", system
                )));
            }
        }
        if let Some(domain) = &request.domain {
            if !filters::validate_filter("Domain", domain) {
                return Err(ElogError::InvalidFilter(format!(
                    "'{}' is not a known domain", domain
                )));
            }
        }
        if request.max_results < 1 || request.max_results > 100 {
            return Err(ElogError::InvalidFilter(format!(
                "max_results must be between 1 and 100, got {}",
                request.max_results
            )));
        }

        let has_criterion = request.query.as_deref().map_or(false, |q| !q.trim().is_empty())
            || request.category.is_some()
            || request.system.is_some()
            || request.domain.is_some()
            || request.since.is_some();
        if !has_criterion {
            return Err(ElogError::InvalidFilter(
                "provide at least one of: query, category, system, domain, since".to_string(),
            ));
        }

        Ok(())
    }
}

/// Order thread members chronologically and derive the parent→child
/// edges among the included messages.
fn finalize_thread(mut messages: Vec<ElogHit>, root_id: u32) -> ThreadGraph {
    messages.sort_by(|a, b| {
        let ta = a.parsed_timestamp();
        let tb = b.parsed_timestamp();
        ta.cmp(&tb).then(a.elog_id.cmp(&b.elog_id))
    });

    let included: HashSet<u32> = messages.iter().map(|m| m.elog_id).collect();
    let edges: Vec<(u32, u32)> = messages
        .iter()
        .filter_map(|m| {
            m.parent_id
                .filter(|pid| included.contains(pid))
                .map(|pid| (pid, m.elog_id))
        })
        .collect();

    let total_messages = messages.len();
    ThreadGraph { messages, edges, root_id, total_messages }
}

fn sort_newest_first(a: &ElogHit, b: &ElogHit) -> std::cmp::Ordering {
    b.parsed_timestamp()
        .cmp(&a.parsed_timestamp())
        .then(b.elog_id.cmp(&a.elog_id))
}

/// Post-filter by the parsed entry timestamps. The server-side date
/// filter is not trusted. The `until` bound is inclusive of the whole
/// end day.
fn filter_by_date_range(hits: Vec<ElogHit>, since: Option<&str>, until: Option<&str>) -> Vec<ElogHit> {
    let since_bound = since.and_then(parse_date_bound).and_then(|d| d.and_hms_opt(0, 0, 0));
    let until_bound = until.and_then(parse_date_bound).and_then(|d| d.and_hms_opt(23, 59, 59));

    if since_bound.is_none() && until_bound.is_none() {
        return hits;
    }

    hits.into_iter()
        .filter(|hit| {
            let Some(ts) = hit.parsed_timestamp() else {
                return false;
            };
            let naive = ts.naive_local();
            if let Some(since) = since_bound {
                if naive < since {
                    return false;
                }
            }
            if let Some(until) = until_bound {
                if naive > until {
                    return false;
                }
            }
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit_with_ts(id: u32, ts: &str) -> ElogHit {
        ElogHit {
            elog_id:        id,
            timestamp:      ts.to_string(),
            author:         String::new(),
            category:       "Info".to_string(),
            system:         String::new(),
            domain:         String::new(),
            section:        String::new(),
            effect:         String::new(),
            title:          format!("entry {}", id),
            body_html:      String::new(),
            body_clean:     String::new(),
            url:            format!("https://elog.example/{}", id),
            attachments:    vec![],
            parent_id:      None,
            replies:        vec![],
            semantic_score: 0.0,
            final_score:    0.0,
        }
    }

    #[test]
    fn date_filter_is_inclusive_of_end_day() {
        let hits = vec![
            hit_with_ts(1, "Mon, 06 Oct 2025 08:00:00 +0200"),
            hit_with_ts(2, "Wed, 08 Oct 2025 23:30:00 +0200"),
            hit_with_ts(3, "Thu, 09 Oct 2025 00:30:00 +0200"),
        ];
        let kept = filter_by_date_range(hits, Some("2025-10-06"), Some("2025-10-08"));
        let ids: Vec<u32> = kept.iter().map(|h| h.elog_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn date_filter_drops_unparsable_timestamps() {
        let hits = vec![hit_with_ts(1, "garbage"), hit_with_ts(2, "Wed, 08 Oct 2025 10:00:00 +0200")];
        let kept = filter_by_date_range(hits, Some("2025-10-01"), None);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].elog_id, 2);
    }

    #[test]
    fn aggregations_count_unknowns() {
        let mut a = hit_with_ts(1, "");
        a.category = String::new();
        let b = hit_with_ts(2, "");
        let agg = Aggregations::from_hits(&[a, b]);
        assert_eq!(agg.category.get("Unknown"), Some(&1));
        assert_eq!(agg.category.get("Info"), Some(&1));
    }

    #[test]
    fn thread_finalization_orders_siblings_and_keeps_internal_edges() {
        let mut root = hit_with_ts(100, "Mon, 06 Oct 2025 08:00:00 +0200");
        root.replies = vec![101, 102];
        let mut late_reply = hit_with_ts(102, "Mon, 06 Oct 2025 12:00:00 +0200");
        late_reply.parent_id = Some(100);
        let mut early_reply = hit_with_ts(101, "Mon, 06 Oct 2025 09:00:00 +0200");
        early_reply.parent_id = Some(100);
        // Parent outside the assembled set: its edge must not appear.
        let mut orphan = hit_with_ts(103, "Mon, 06 Oct 2025 10:00:00 +0200");
        orphan.parent_id = Some(999);

        let graph = finalize_thread(vec![late_reply, root, early_reply, orphan], 100);

        assert!(graph.contains(100));
        let order: Vec<u32> = graph.messages.iter().map(|m| m.elog_id).collect();
        assert_eq!(order, vec![100, 101, 103, 102], "chronological, siblings ascending");
        assert_eq!(graph.edges, vec![(100, 101), (100, 102)]);
        assert_eq!(graph.root_id, 100);
        assert_eq!(graph.total_messages, 4);
    }

    #[test]
    fn validation_rejects_criterionless_request() {
        let request = SearchRequest { max_results: 10, ..Default::default() };
        assert!(ElogCore::validate(&request).is_err());

        let request = SearchRequest {
            query: Some("beam dump".to_string()),
            max_results: 10,
            ..Default::default()
        };
        assert!(ElogCore::validate(&request).is_ok());
    }

    #[test]
    fn validation_rejects_unknown_category_and_bad_limits() {
        let request = SearchRequest {
            category: Some("Gossip".to_string()),
            max_results: 10,
            ..Default::default()
        };
        assert!(ElogCore::validate(&request).is_err());

        let request = SearchRequest {
            query: Some("x".to_string()),
            max_results: 0,
            ..Default::default()
        };
        assert!(ElogCore::validate(&request).is_err());

        let request = SearchRequest {
            query: Some("x".to_string()),
            max_results: 101,
            ..Default::default()
        };
        assert!(ElogCore::validate(&request).is_err());
    }
}
