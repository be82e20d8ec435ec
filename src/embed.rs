//! Keeps the vector store in step with the transaction store: every record whose `search_body` has
//! no current embedding is embedded and stored.

use crate::api::Embedder;
use crate::classify::retry::{self, RetryPolicy};
use crate::enrich::progress_due;
use crate::error::{ErrorType, ProviderError};
use crate::identity::{self, TransactionId};
use crate::model::Record;
use crate::store::{TransactionStore, VectorStore};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Embeddings stored before cancellation remain stored.
    #[error("interrupted")]
    Interrupted,

    #[error("unable to read stored transactions")]
    Records(#[source] BoxError),

    #[error("unable to embed transaction {id}")]
    Embed {
        id: TransactionId,
        #[source]
        source: ProviderError,
    },

    #[error("unable to store the embedding for transaction {id}")]
    Store {
        id: TransactionId,
        #[source]
        source: BoxError,
    },
}

impl IndexError {
    /// How the failure is reported to the user.
    pub fn error_type(&self) -> ErrorType {
        match self {
            IndexError::Interrupted => ErrorType::Interrupted,
            IndexError::Embed { .. } => ErrorType::Provider,
            IndexError::Records(_) | IndexError::Store { .. } => ErrorType::Database,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Records that were embedded during this run.
    pub embedded: usize,
    /// Records whose stored embedding was already current.
    pub unchanged: usize,
}

pub struct EmbeddingIndexer {
    store: Arc<dyn TransactionStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    retry: RetryPolicy,
    completed: AtomicUsize,
}

impl EmbeddingIndexer {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            vectors,
            embedder,
            retry: RetryPolicy::default(),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Embeds every stored record whose embedding is missing or was computed from a different
    /// `search_body`. At most `concurrency` embedding calls run at once. The first failure cancels
    /// the remaining work and is returned.
    pub async fn index(
        &self,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Result<IndexReport, IndexError> {
        if cancel.is_cancelled() {
            return Err(IndexError::Interrupted);
        }
        let concurrency = concurrency.max(1);
        let records = self
            .store
            .records()
            .await
            .map_err(|e| IndexError::Records(e.into()))?;

        let mut stale = Vec::new();
        let mut unchanged = 0;
        for record in records {
            let hash = identity::content_hash(&record.details.search_body);
            let current = self
                .vectors
                .has_embedding(&record.id, &hash)
                .await
                .map_err(|e| IndexError::Records(e.into()))?;
            if current {
                unchanged += 1;
            } else {
                stale.push(record);
            }
        }
        info!(
            stale = stale.len(),
            unchanged,
            concurrency,
            model = self.embedder.model_name(),
            "indexing embeddings"
        );
        self.completed.store(0, Ordering::Relaxed);

        let total = stale.len();
        let scope = cancel.child_token();
        let mut outcomes = stream::iter(stale)
            .map(|record| {
                let scope = scope.clone();
                async move { self.embed_one(record, &scope).await }
            })
            .buffer_unordered(concurrency);

        let mut embedded = 0;
        let mut failure: Option<IndexError> = None;
        let mut interrupted = false;
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Ok(()) => {
                    embedded += 1;
                    if progress_due(embedded, total) {
                        info!(done = embedded, total, "embedded {embedded} of {total} transactions");
                    }
                }
                Err(IndexError::Interrupted) => interrupted = true,
                Err(e) => {
                    if failure.is_none() {
                        error!("{e}, cancelling the remaining work");
                        scope.cancel();
                        failure = Some(e);
                    }
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if interrupted {
            return Err(IndexError::Interrupted);
        }
        Ok(IndexReport {
            embedded,
            unchanged,
        })
    }

    async fn embed_one(&self, record: Record, scope: &CancellationToken) -> Result<(), IndexError> {
        if scope.is_cancelled() {
            return Err(IndexError::Interrupted);
        }
        let text = &record.details.search_body;
        let vector = retry::run(&self.retry, "embed", scope, |_| self.embedder.embed(text))
            .await
            .map_err(|source| {
                if source.is_cancelled() {
                    IndexError::Interrupted
                } else {
                    IndexError::Embed {
                        id: record.id.clone(),
                        source,
                    }
                }
            })?;
        if scope.is_cancelled() {
            return Err(IndexError::Interrupted);
        }

        self.vectors
            .upsert(&record.id, text, &vector, self.embedder.model_name())
            .await
            .map_err(|e| IndexError::Store {
                id: record.id.clone(),
                source: e.into(),
            })?;
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(id = %record.id, done, "embedding stored");
        Ok(())
    }
}
