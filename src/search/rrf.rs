//! Reciprocal Rank Fusion: `score(id) = Σ 1 / (k + rank)` over every list that contains `id`,
//! with 1-based ranks.
//!
//! RRF combines rankings without normalizing scores that come from unrelated scales (bm25 and
//! cosine similarity).

use crate::identity::TransactionId;
use crate::model::SearchResult;
use std::cmp::Ordering;
use std::collections::HashMap;

/// The smoothing constant. Larger values flatten the advantage of top-ranked items.
pub const K: f64 = 60.0;

/// The contribution of one list to a result at `rank` (1-based).
pub fn contribution(rank: usize) -> f64 {
    1.0 / (K + rank as f64)
}

/// Fuses two ranked lists. Each list must be ordered best first. A result that appears in both
/// keeps the text score from the lexical list and the vector score from the vector list.
///
/// The output is ordered by `rrf_score` descending, ties broken by ID ascending.
pub fn fuse(lexical: Vec<SearchResult>, vector: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut fused: HashMap<TransactionId, SearchResult> = HashMap::new();

    for (index, mut result) in lexical.into_iter().enumerate() {
        result.score.rrf_score = Some(contribution(index + 1));
        result.score.vector_score = None;
        fused.insert(result.record.id.clone(), result);
    }

    for (index, result) in vector.into_iter().enumerate() {
        let rrf = contribution(index + 1);
        match fused.get_mut(&result.record.id) {
            Some(existing) => {
                existing.score.vector_score = result.score.vector_score;
                existing.score.rrf_score = Some(existing.score.rrf_score.unwrap_or(0.0) + rrf);
            }
            None => {
                let mut result = result;
                result.score.text_score = None;
                result.score.rrf_score = Some(rrf);
                fused.insert(result.record.id.clone(), result);
            }
        }
    }

    let mut results: Vec<SearchResult> = fused.into_values().collect();
    results.sort_by(by_rrf_score);
    results
}

fn by_rrf_score(a: &SearchResult, b: &SearchResult) -> Ordering {
    let a_score = a.score.rrf_score.unwrap_or(0.0);
    let b_score = b.score.rrf_score.unwrap_or(0.0);
    b_score
        .partial_cmp(&a_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.record.id.cmp(&b.record.id))
}
