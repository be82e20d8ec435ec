//! Embedding storage in the `embeddings` table with a brute-force cosine similarity scan.

use crate::error::Res;
use crate::identity::{self, TransactionId};
use crate::store::VectorStore;
use anyhow::Context;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::cmp::Ordering;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub(crate) struct SqliteVectors {
    pool: SqlitePool,
}

impl SqliteVectors {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for SqliteVectors {
    async fn upsert(
        &self,
        id: &TransactionId,
        text: &str,
        vector: &[f32],
        model: &str,
    ) -> Res<()> {
        sqlx::query(
            "INSERT INTO embeddings (id, content_hash, model, dims, vector) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 content_hash = excluded.content_hash, \
                 model = excluded.model, \
                 dims = excluded.dims, \
                 vector = excluded.vector, \
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
        )
        .bind(id.as_str())
        .bind(identity::content_hash(text))
        .bind(model)
        .bind(vector.len() as i64)
        .bind(to_bytes(vector))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Unable to store the embedding for {id}"))?;
        Ok(())
    }

    async fn has_embedding(&self, id: &TransactionId, content_hash: &str) -> Res<bool> {
        let found: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM embeddings WHERE id = ? AND content_hash = ?")
                .bind(id.as_str())
                .bind(content_hash)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("Unable to look up the embedding for {id}"))?;
        Ok(found.is_some())
    }

    async fn query_similar(
        &self,
        vector: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Res<Vec<(TransactionId, f32)>> {
        let rows: Vec<(String, i64, Vec<u8>)> =
            sqlx::query_as("SELECT id, dims, vector FROM embeddings")
                .fetch_all(&self.pool)
                .await
                .context("Unable to read embeddings")?;

        let mut scored = Vec::new();
        for (id, dims, blob) in rows {
            // Vectors from a different model cannot be compared.
            if dims as usize != vector.len() {
                continue;
            }
            let similarity = cosine_similarity(vector, &from_bytes(&blob));
            if threshold > 0.0 && similarity < threshold {
                continue;
            }
            let id = TransactionId::from_str(&id)
                .with_context(|| format!("The embeddings table holds an invalid ID '{id}'"))?;
            scored.push((id, similarity));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn remove(&self, id: &TransactionId) -> Res<()> {
        sqlx::query("DELETE FROM embeddings WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Unable to remove the embedding for {id}"))?;
        Ok(())
    }
}

/// Little-endian f32s.
fn to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Zero when either vector has no magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}
