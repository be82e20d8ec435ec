//! Hybrid retrieval: lexical search from the transaction store, semantic search from the vector
//! store, and Reciprocal Rank Fusion of the two.
//!
//! None of the search methods take a cancellation token. Dropping the returned future cancels any
//! work still in flight.

pub mod rrf;

use crate::api::Embedder;
use crate::error::Res;
use crate::model::{OrderBy, SearchOptions, SearchResult, SearchResults, SearchScore};
use crate::store::{TransactionStore, VectorStore};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// How many nearest neighbours are requested from the vector store before records are resolved
/// and the date cutoff is applied.
pub const DEFAULT_VECTOR_CANDIDATES: usize = 200;

pub struct SearchEngine {
    store: Arc<dyn TransactionStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    vector_candidates: usize,
}

impl SearchEngine {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            vectors,
            embedder,
            vector_candidates: DEFAULT_VECTOR_CANDIDATES,
        }
    }

    pub fn with_vector_candidates(mut self, candidates: usize) -> Self {
        self.vector_candidates = candidates.max(1);
        self
    }

    /// Runs lexical and vector search concurrently, each for twice the requested limit, and fuses
    /// the two rankings. `total` is the size of the fused set before truncation.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Res<SearchResults> {
        if query.trim().is_empty() {
            return Ok(SearchResults::default());
        }
        let cutoff = resolve_cutoff(options);
        let fusion_limit = options.limit.saturating_mul(2);

        let (lexical, semantic) = tokio::try_join!(
            self.lexical(query, cutoff, fusion_limit),
            self.semantic(query, cutoff, fusion_limit, options.vector_threshold),
        )?;
        debug!(
            lexical = lexical.results.len(),
            vector = semantic.results.len(),
            "fusing result lists"
        );

        let mut results = rrf::fuse(lexical.results, semantic.results);
        let total = results.len();
        if options.order_by == OrderBy::Date {
            results.sort_by(by_date);
        }
        results.truncate(options.limit);
        Ok(SearchResults { results, total })
    }

    /// Full-text search only. `total` is the number of matches passing the date cutoff.
    pub async fn text_search(&self, query: &str, options: &SearchOptions) -> Res<SearchResults> {
        if query.trim().is_empty() {
            return Ok(SearchResults::default());
        }
        let mut found = self
            .lexical(query, resolve_cutoff(options), options.limit)
            .await?;
        if options.order_by == OrderBy::Date {
            found.results.sort_by(by_date);
        }
        Ok(found)
    }

    /// Vector similarity search only. `total` is the number of matches above the threshold that
    /// still resolve to a stored record and pass the date cutoff.
    pub async fn vector_search(&self, query: &str, options: &SearchOptions) -> Res<SearchResults> {
        if query.trim().is_empty() {
            return Ok(SearchResults::default());
        }
        let mut found = self
            .semantic(
                query,
                resolve_cutoff(options),
                options.limit,
                options.vector_threshold,
            )
            .await?;
        if options.order_by == OrderBy::Date {
            found.results.sort_by(by_date);
        }
        Ok(found)
    }

    async fn lexical(
        &self,
        query: &str,
        cutoff: Option<NaiveDate>,
        limit: usize,
    ) -> Res<SearchResults> {
        let matches = self.store.text_search(query, cutoff, limit).await?;
        let results = matches
            .results
            .into_iter()
            .map(|(record, score)| SearchResult {
                record,
                score: SearchScore {
                    text_score: Some(score),
                    ..Default::default()
                },
            })
            .collect();
        Ok(SearchResults {
            results,
            total: matches.total,
        })
    }

    /// Results are ordered by similarity, best first, ties broken by ID.
    async fn semantic(
        &self,
        query: &str,
        cutoff: Option<NaiveDate>,
        limit: usize,
        threshold: f32,
    ) -> Res<SearchResults> {
        let vector = self.embedder.embed(query).await?;
        let candidates = self.vector_candidates.max(limit);
        let similar = self
            .vectors
            .query_similar(&vector, candidates, threshold)
            .await?;

        let mut results = Vec::new();
        let mut total = 0;
        for (id, similarity) in similar {
            let Some(record) = self.store.get(&id).await? else {
                debug!(id = %id, "removing embedding for a transaction that no longer exists");
                if let Err(e) = self.vectors.remove(&id).await {
                    warn!(id = %id, "Unable to remove a stale embedding: {e:#}");
                }
                continue;
            };
            if cutoff.is_some_and(|c| record.transaction.date() < c) {
                continue;
            }
            total += 1;
            if results.len() < limit {
                results.push(SearchResult {
                    record,
                    score: SearchScore {
                        vector_score: Some(similarity),
                        ..Default::default()
                    },
                });
            }
        }
        results.sort_by(by_similarity);
        Ok(SearchResults { results, total })
    }
}

fn resolve_cutoff(options: &SearchOptions) -> Option<NaiveDate> {
    options.cutoff(chrono::Local::now().date_naive())
}

fn by_similarity(a: &SearchResult, b: &SearchResult) -> Ordering {
    let a_score = a.score.vector_score.unwrap_or(f32::MIN);
    let b_score = b.score.vector_score.unwrap_or(f32::MIN);
    b_score
        .partial_cmp(&a_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.record.id.cmp(&b.record.id))
}

/// Newest first, ties broken by ID.
fn by_date(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.record
        .transaction
        .date()
        .cmp(&a.record.transaction.date())
        .then_with(|| a.record.id.cmp(&b.record.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::TransactionId;
    use crate::model::Record;
    use crate::test::{date, record, FixedEmbedder, MemoryStore, MemoryVectors};
    use std::str::FromStr;

    fn engine(store: Arc<MemoryStore>, vectors: Arc<MemoryVectors>) -> SearchEngine {
        SearchEngine::new(store, vectors, Arc::new(FixedEmbedder(vec![1.0, 0.0])))
    }

    fn payees(results: &SearchResults) -> Vec<&str> {
        results
            .results
            .iter()
            .map(|r| r.record.transaction.payee())
            .collect()
    }

    /// Four records A-D where the lexical list is [A, B, C] and the vector list is [B, C, D].
    fn fixture() -> (Arc<MemoryStore>, Arc<MemoryVectors>, Vec<Record>) {
        let records = vec![
            record("2025-01-04", "-1.00", "A"),
            record("2025-01-03", "-2.00", "B"),
            record("2025-01-02", "-3.00", "C"),
            record("2025-01-01", "-4.00", "D"),
        ];
        let store = Arc::new(MemoryStore::with_records(&records));
        store.set_lexical(&[&records[0].id, &records[1].id, &records[2].id]);
        let vectors = Arc::new(MemoryVectors::with_similar(vec![
            (records[1].id.clone(), 0.9),
            (records[2].id.clone(), 0.8),
            (records[3].id.clone(), 0.7),
        ]));
        (store, vectors, records)
    }

    #[tokio::test]
    async fn test_hybrid_search_fuses_with_rrf() {
        let (store, vectors, _) = fixture();
        let found = engine(store, vectors)
            .search("anything", &SearchOptions::new(10))
            .await
            .unwrap();
        assert_eq!(payees(&found), vec!["B", "C", "A", "D"]);
        assert_eq!(found.total, 4);

        let a = &found.results[2].score;
        assert!(a.text_score.is_some());
        assert_eq!(a.vector_score, None);
        assert!((a.rrf_score.unwrap() - 1.0 / 61.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_hybrid_total_counts_before_truncation() {
        let (store, vectors, _) = fixture();
        let found = engine(store, vectors)
            .search("anything", &SearchOptions::new(2))
            .await
            .unwrap();
        assert_eq!(payees(&found), vec!["B", "C"]);
        assert_eq!(found.total, 4);
    }

    #[tokio::test]
    async fn test_hybrid_order_by_date() {
        let (store, vectors, _) = fixture();
        let options = SearchOptions::new(10).with_order_by(OrderBy::Date);
        let found = engine(store, vectors)
            .search("anything", &options)
            .await
            .unwrap();
        assert_eq!(payees(&found), vec!["A", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn test_stale_embedding_is_removed_once() {
        let kept = record("2025-01-01", "-1.00", "Kept");
        let missing = TransactionId::from_str("0badf00d").unwrap();
        let store = Arc::new(MemoryStore::with_records(&[kept.clone()]));
        let vectors = Arc::new(MemoryVectors::with_similar(vec![
            (missing.clone(), 0.95),
            (kept.id.clone(), 0.5),
        ]));
        let found = engine(store, vectors.clone())
            .vector_search("anything", &SearchOptions::new(10))
            .await
            .unwrap();
        assert_eq!(payees(&found), vec!["Kept"]);
        assert_eq!(found.total, 1);
        assert_eq!(vectors.removed(), vec![missing]);
    }

    #[tokio::test]
    async fn test_failed_removal_is_not_an_error() {
        let missing = TransactionId::from_str("0badf00d").unwrap();
        let store = Arc::new(MemoryStore::default());
        let vectors =
            Arc::new(MemoryVectors::with_similar(vec![(missing.clone(), 0.9)]).failing_remove());
        let found = engine(store, vectors.clone())
            .vector_search("anything", &SearchOptions::new(10))
            .await
            .unwrap();
        assert!(found.results.is_empty());
        assert_eq!(found.total, 0);
        assert_eq!(vectors.removed(), vec![missing]);
    }

    #[tokio::test]
    async fn test_vector_cutoff_is_inclusive() {
        let before = record("2025-03-09", "-1.00", "Before");
        let on = record("2025-03-10", "-1.00", "On");
        let after = record("2025-03-11", "-1.00", "After");
        let store = Arc::new(MemoryStore::with_records(&[
            before.clone(),
            on.clone(),
            after.clone(),
        ]));
        let vectors = Arc::new(MemoryVectors::with_similar(vec![
            (before.id.clone(), 0.9),
            (on.id.clone(), 0.8),
            (after.id.clone(), 0.7),
        ]));
        let options = SearchOptions::new(10).with_date_cutoff(date("2025-03-10"));
        let found = engine(store, vectors)
            .vector_search("anything", &options)
            .await
            .unwrap();
        assert_eq!(payees(&found), vec!["On", "After"]);
        assert_eq!(found.total, 2);
    }

    #[tokio::test]
    async fn test_text_cutoff_is_inclusive() {
        let before = record("2025-03-09", "-1.00", "Before");
        let on = record("2025-03-10", "-1.00", "On");
        let after = record("2025-03-11", "-1.00", "After");
        let store = Arc::new(MemoryStore::with_records(&[
            before.clone(),
            on.clone(),
            after.clone(),
        ]));
        store.set_lexical(&[&before.id, &on.id, &after.id]);
        let options = SearchOptions::new(10).with_date_cutoff(date("2025-03-10"));
        let found = engine(store, Arc::new(MemoryVectors::default()))
            .text_search("anything", &options)
            .await
            .unwrap();
        assert_eq!(payees(&found), vec!["On", "After"]);
        assert_eq!(found.total, 2);
    }

    #[tokio::test]
    async fn test_vector_limit_and_total() {
        let records: Vec<Record> = ["P", "Q", "R"]
            .iter()
            .map(|p| record("2025-01-01", "-1.00", p))
            .collect();
        let store = Arc::new(MemoryStore::with_records(&records));
        let vectors = Arc::new(MemoryVectors::with_similar(vec![
            (records[0].id.clone(), 0.9),
            (records[1].id.clone(), 0.6),
            (records[2].id.clone(), 0.2),
        ]));
        let options = SearchOptions::new(1).with_vector_threshold(0.5);
        let found = engine(store, vectors)
            .vector_search("anything", &options)
            .await
            .unwrap();
        assert_eq!(payees(&found), vec!["P"]);
        assert_eq!(found.total, 2);
        assert_eq!(found.results[0].score.vector_score, Some(0.9));
    }

    #[tokio::test]
    async fn test_blank_query_returns_nothing() {
        let (store, vectors, _) = fixture();
        let engine = engine(store, vectors);
        let options = SearchOptions::new(10);
        assert_eq!(
            engine.search("   ", &options).await.unwrap(),
            SearchResults::default()
        );
        assert_eq!(
            engine.text_search("", &options).await.unwrap(),
            SearchResults::default()
        );
    }
}
