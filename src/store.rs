//! Storage seams. The SQLite implementations live in `db`; tests substitute their own.

use crate::error::Res;
use crate::identity::TransactionId;
use crate::model::{Record, TransactionDetails};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Lexical matches ranked best first, plus the number of matches before `limit` was applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextMatches {
    /// Each record with its lexical relevance. Higher is better.
    pub results: Vec<(Record, f64)>,
    pub total: usize,
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn exists(&self, id: &TransactionId) -> Res<bool>;

    async fn get(&self, id: &TransactionId) -> Res<Option<Record>>;

    /// Inserts or replaces the record, keeping the full-text index in step.
    async fn upsert(&self, record: &Record) -> Res<()>;

    /// Full-text search over `search_body`. Only records dated on or after `cutoff` match.
    async fn text_search(
        &self,
        query: &str,
        cutoff: Option<NaiveDate>,
        limit: usize,
    ) -> Res<TextMatches>;

    /// All stored records ordered by ID.
    async fn records(&self) -> Res<Vec<Record>>;

    /// Replaces the details of an existing record. Returns false if there is no such record.
    async fn update_details(&self, id: &TransactionId, details: &TransactionDetails) -> Res<bool>;
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Stores the vector for `id`, replacing any earlier one. `text` is what was embedded.
    async fn upsert(&self, id: &TransactionId, text: &str, vector: &[f32], model: &str)
        -> Res<()>;

    /// True if a vector exists for `id` that was computed from text with `content_hash`.
    async fn has_embedding(&self, id: &TransactionId, content_hash: &str) -> Res<bool>;

    /// The most similar vectors, best first, with cosine similarity of at least `threshold`.
    async fn query_similar(
        &self,
        vector: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Res<Vec<(TransactionId, f32)>>;

    async fn remove(&self, id: &TransactionId) -> Res<()>;
}
