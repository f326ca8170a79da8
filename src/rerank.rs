//! Cross-encoder reranking with time decay and diversity caps.
//!
//! Raw semantic scores are comparable within a single call only; the
//! recency boost multiplies them, and a greedy pass caps how many hits
//! of one category reach the result.

use crate::error::RerankError;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Recency half-life. Entries two days old get half the boost.
pub const HALF_LIFE_HOURS: f64 = 48.0;

/// At most this many hits per category in a reranked result, unless
/// relaxing the cap is the only way to fill the requested K.
pub const MAX_PER_CATEGORY: usize = 5;

/// Word budget of the document text handed to the encoder.
const ENCODER_DOC_WORDS: usize = 512;

/// Scores query–document pairs. Higher is more relevant; scores are
/// unbounded and only comparable within one call.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError>;
}

/// A candidate as the reranker sees it.
#[derive(Debug, Clone)]
pub struct CandidateDoc {
    /// Title and cleaned body, concatenated.
    pub text:      String,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub category:  String,
}

/// One reranked position: index into the input slice plus both scores.
#[derive(Debug, Clone, Copy)]
pub struct RankedIndex {
    pub index:       usize,
    pub semantic:    f32,
    pub final_score: f32,
}

type EncoderFactory =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn CrossEncoder>, RerankError>> + Send + Sync>;

/// Process-wide reranker. The cross-encoder loads on first use behind an
/// init-once cell and is shared across turns; if loading fails the
/// reranker degrades to timestamp ordering for the rest of the process.
pub struct Reranker {
    factory: EncoderFactory,
    encoder: OnceCell<Option<Arc<dyn CrossEncoder>>>,
}

impl Reranker {
    pub fn new(factory: EncoderFactory) -> Self {
        Self { factory, encoder: OnceCell::new() }
    }

    /// A reranker over an already-constructed encoder. Used by tests and
    /// by deployments that preload the model.
    pub fn with_encoder(encoder: Arc<dyn CrossEncoder>) -> Self {
        let reranker = Self::new(Box::new(|| {
            Box::pin(async { Err(RerankError::EncoderUnavailable("preloaded".to_string())) })
        }));
        reranker
            .encoder
            .set(Some(encoder))
            .ok()
            .expect("fresh cell accepts a value");
        reranker
    }

    /// A reranker that never loads an encoder — always timestamp order.
    pub fn disabled() -> Self {
        let reranker = Self::new(Box::new(|| {
            Box::pin(async { Err(RerankError::EncoderUnavailable("disabled".to_string())) })
        }));
        reranker.encoder.set(None).ok().expect("fresh cell accepts a value");
        reranker
    }

    async fn encoder(&self) -> Option<Arc<dyn CrossEncoder>> {
        self.encoder
            .get_or_init(|| async {
                match (self.factory)().await {
                    Ok(encoder) => {
                        tracing::info!("cross-encoder loaded");
                        Some(encoder)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "cross-encoder load failed — degrading to timestamp order");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Rank `documents` against `query` and return at most `k` indices.
    ///
    /// Deterministic given identical inputs and a loaded model: ties
    /// break on the input index.
    pub async fn rank(&self, query: &str, documents: &[CandidateDoc], k: usize) -> Vec<RankedIndex> {
        if documents.is_empty() || k == 0 {
            return Vec::new();
        }

        let Some(encoder) = self.encoder().await else {
            return Self::timestamp_fallback(documents, k);
        };

        let texts: Vec<String> = documents
            .iter()
            .map(|d| truncate_words(&d.text, ENCODER_DOC_WORDS))
            .collect();

        let semantic = match encoder.score(query, &texts).await {
            Ok(scores) if scores.len() == documents.len() => scores,
            Ok(scores) => {
                tracing::error!(
                    expected = documents.len(),
                    got = scores.len(),
                    "encoder returned wrong score count — degrading to timestamp order"
                );
                return Self::timestamp_fallback(documents, k);
            }
            Err(e) => {
                tracing::error!(error = %e, "scoring failed — degrading to timestamp order");
                return Self::timestamp_fallback(documents, k);
            }
        };

        let now = Utc::now();
        let mut scored: Vec<RankedIndex> = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| {
                let boost = recency_boost(doc.timestamp, now);
                let raw = semantic[index] * boost as f32;
                RankedIndex { index, semantic: semantic[index], final_score: raw }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });

        diversify(&scored, documents, k)
    }

    fn timestamp_fallback(documents: &[CandidateDoc], k: usize) -> Vec<RankedIndex> {
        let mut indices: Vec<usize> = (0..documents.len()).collect();
        indices.sort_by(|&a, &b| {
            documents[b]
                .timestamp
                .cmp(&documents[a].timestamp)
                .then(a.cmp(&b))
        });
        indices
            .into_iter()
            .take(k)
            .map(|index| RankedIndex { index, semantic: 0.0, final_score: 0.0 })
            .collect()
    }
}

/// `1 + exp(-age_hours / half_life)`. Future or unparsable timestamps
/// get the neutral boost of 1.
fn recency_boost(timestamp: Option<DateTime<FixedOffset>>, now: DateTime<Utc>) -> f64 {
    match timestamp {
        Some(ts) => {
            let age_hours = (now - ts.with_timezone(&Utc)).num_seconds() as f64 / 3600.0;
            if age_hours < 0.0 {
                1.0
            } else {
                1.0 + (-age_hours / HALF_LIFE_HOURS).exp()
            }
        }
        None => 1.0,
    }
}

/// Greedy selection over candidates sorted by raw score. A candidate is
/// skipped once its category holds MAX_PER_CATEGORY picks; a second pass
/// relaxes the cap when the strict pass cannot fill K.
fn diversify(sorted: &[RankedIndex], documents: &[CandidateDoc], k: usize) -> Vec<RankedIndex> {
    use std::collections::HashMap;

    let mut picked: Vec<RankedIndex> = Vec::with_capacity(k);
    let mut per_category: HashMap<&str, usize> = HashMap::new();
    let mut skipped: Vec<RankedIndex> = Vec::new();

    for &candidate in sorted {
        if picked.len() == k {
            break;
        }
        let category = documents[candidate.index].category.as_str();
        let count = per_category.entry(category).or_insert(0);
        if *count < MAX_PER_CATEGORY {
            *count += 1;
            picked.push(candidate);
        } else {
            skipped.push(candidate);
        }
    }

    // Cap relaxation: better to overfill a category than underfill K.
    for candidate in skipped {
        if picked.len() == k {
            break;
        }
        picked.push(candidate);
    }
    picked.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.index.cmp(&b.index))
    });
    picked
}

fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        text.to_string()
    } else {
        words[..max_words].join(" ")
    }
}

// ── HTTP-backed encoder ─────────────────────────────────────────────────

/// Client of a rerank scoring service (`POST /rerank` with
/// `{query, documents}` returning `{scores: [..]}`), the usual way to
/// serve a cross-encoder next to the assistant.
pub struct HttpCrossEncoder {
    http:     reqwest::Client,
    endpoint: String,
}

impl HttpCrossEncoder {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base = base_url.into();
        Self {
            http:     reqwest::Client::new(),
            endpoint: format!("{}/rerank", base.trim_end_matches('/')),
        }
    }
}

#[derive(serde::Serialize)]
struct RerankHttpRequest<'a> {
    query:     &'a str,
    documents: &'a [String],
}

#[derive(serde::Deserialize)]
struct RerankHttpResponse {
    scores: Vec<f32>,
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&RerankHttpRequest { query, documents })
            .send()
            .await
            .map_err(|e| RerankError::EncoderUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RerankError::Scoring(format!("status {}", response.status())));
        }

        let parsed: RerankHttpResponse = response
            .json()
            .await
            .map_err(|e| RerankError::Scoring(e.to_string()))?;
        Ok(parsed.scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    /// Scores each document by the count of query words it contains.
    struct WordOverlapEncoder;

    #[async_trait]
    impl CrossEncoder for WordOverlapEncoder {
        async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankError> {
            let words: Vec<&str> = query.split_whitespace().collect();
            Ok(documents
                .iter()
                .map(|d| words.iter().filter(|w| d.contains(**w)).count() as f32)
                .collect())
        }
    }

    struct FailingEncoder;

    #[async_trait]
    impl CrossEncoder for FailingEncoder {
        async fn score(&self, _: &str, _: &[String]) -> Result<Vec<f32>, RerankError> {
            Err(RerankError::Scoring("model crashed".to_string()))
        }
    }

    fn doc(text: &str, category: &str, age_hours: i64) -> CandidateDoc {
        let ts = (Utc::now() - Duration::hours(age_hours)).fixed_offset();
        CandidateDoc {
            text:      text.to_string(),
            timestamp: Some(ts),
            category:  category.to_string(),
        }
    }

    #[tokio::test]
    async fn relevance_orders_results() {
        let reranker = Reranker::with_encoder(Arc::new(WordOverlapEncoder));
        let docs = vec![
            doc("cooling water pressure", "Info", 1000),
            doc("beam dump during injection", "Problem", 1000),
            doc("beam energy report", "Info", 1000),
        ];
        let ranked = reranker.rank("beam dump", &docs, 3).await;
        assert_eq!(ranked[0].index, 1);
        assert!(ranked[0].semantic > ranked[1].semantic);
    }

    #[tokio::test]
    async fn recency_breaks_relevance_ties() {
        let reranker = Reranker::with_encoder(Arc::new(WordOverlapEncoder));
        let docs = vec![
            doc("beam dump a", "Info", 24 * 30),
            doc("beam dump b", "Info", 1),
        ];
        let ranked = reranker.rank("beam dump", &docs, 2).await;
        // Same semantic score, fresher entry boosted above the stale one.
        assert_eq!(ranked[0].index, 1);
        assert!(ranked[0].final_score > ranked[1].final_score);
    }

    #[tokio::test]
    async fn output_bounded_by_k_and_drawn_from_input() {
        let reranker = Reranker::with_encoder(Arc::new(WordOverlapEncoder));
        let docs: Vec<CandidateDoc> =
            (0..20).map(|i| doc(&format!("entry {}", i), "Info", i)).collect();
        let ranked = reranker.rank("entry", &docs, 7).await;
        assert_eq!(ranked.len(), 7);
        assert!(ranked.iter().all(|r| r.index < docs.len()));
    }

    #[tokio::test]
    async fn category_cap_enforced_until_it_would_starve_k() {
        let reranker = Reranker::with_encoder(Arc::new(WordOverlapEncoder));
        let mut docs: Vec<CandidateDoc> =
            (0..8).map(|i| doc("beam entry", "Problem", i)).collect();
        docs.push(doc("beam entry", "Info", 0));

        // K=6 with 8 Problem docs and 1 Info doc: cap admits 5 Problem,
        // the Info doc fills the sixth slot.
        let ranked = reranker.rank("beam", &docs, 6).await;
        let problems = ranked.iter().filter(|r| docs[r.index].category == "Problem").count();
        assert_eq!(ranked.len(), 6);
        assert_eq!(problems, 5);

        // K=7 needs the relaxed cap: only 9 docs exist in two categories.
        let ranked = reranker.rank("beam", &docs, 7).await;
        assert_eq!(ranked.len(), 7);
        let problems = ranked.iter().filter(|r| docs[r.index].category == "Problem").count();
        assert_eq!(problems, 6);
    }

    #[tokio::test]
    async fn rerank_is_deterministic() {
        let reranker = Reranker::with_encoder(Arc::new(WordOverlapEncoder));
        let docs: Vec<CandidateDoc> = (0..10)
            .map(|i| doc(&format!("beam entry {}", i % 3), "Info", 500))
            .collect();
        let a: Vec<usize> = reranker.rank("beam", &docs, 5).await.iter().map(|r| r.index).collect();
        let b: Vec<usize> = reranker.rank("beam", &docs, 5).await.iter().map(|r| r.index).collect();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn scoring_failure_falls_back_to_timestamp_order() {
        let reranker = Reranker::with_encoder(Arc::new(FailingEncoder));
        let docs = vec![
            doc("old", "Info", 100),
            doc("new", "Info", 1),
            doc("middle", "Info", 50),
        ];
        let ranked = reranker.rank("anything", &docs, 2).await;
        let indices: Vec<usize> = ranked.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[tokio::test]
    async fn load_failure_degrades_once_and_stays_degraded() {
        let reranker = Reranker::new(Box::new(|| {
            Box::pin(async { Err(RerankError::EncoderUnavailable("no model file".to_string())) })
        }));
        let docs = vec![doc("a", "Info", 2), doc("b", "Info", 1)];
        let first = reranker.rank("q", &docs, 2).await;
        let second = reranker.rank("q", &docs, 2).await;
        assert_eq!(first.iter().map(|r| r.index).collect::<Vec<_>>(), vec![1, 0]);
        assert_eq!(second.iter().map(|r| r.index).collect::<Vec<_>>(), vec![1, 0]);
    }
}
