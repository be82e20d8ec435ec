//! The enrichment pipeline: classify and store a batch of raw transactions under bounded
//! parallelism.

use crate::classify::Classifier;
use crate::error::{ErrorType, ProviderError};
use crate::identity::TransactionId;
use crate::model::{Record, Transaction};
use crate::store::TransactionStore;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum EnrichError {
    /// The batch was cancelled. Records stored before cancellation remain stored.
    #[error("interrupted")]
    Interrupted,

    #[error("unable to classify transaction {id} ({payee})")]
    Classify {
        id: TransactionId,
        payee: String,
        #[source]
        source: ProviderError,
    },

    #[error("unable to store transaction {id}")]
    Store {
        id: TransactionId,
        #[source]
        source: BoxError,
    },

    #[error("unable to look up transaction {id}")]
    Lookup {
        id: TransactionId,
        #[source]
        source: BoxError,
    },
}

impl EnrichError {
    /// How the failure is reported to the user.
    pub fn error_type(&self) -> ErrorType {
        match self {
            EnrichError::Interrupted => ErrorType::Interrupted,
            EnrichError::Classify { .. } => ErrorType::Provider,
            EnrichError::Store { .. } | EnrichError::Lookup { .. } => ErrorType::Database,
        }
    }
}

/// The outcome of a successful batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enriched {
    /// Newly classified and stored records, in input order.
    pub classified: Vec<Record>,
    /// Records that were already stored and were not classified again, in input order.
    pub existing: Vec<Record>,
}

/// Counts completed classifications while a batch runs.
#[derive(Debug, Default)]
pub struct Progress {
    completed: AtomicUsize,
    total: AtomicUsize,
}

impl Progress {
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    fn start(&self, total: usize) {
        self.completed.store(0, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
    }

    fn increment(&self) -> usize {
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// True when `done` of `total` is worth an info line: every tenth of the batch and the last item.
pub(crate) fn progress_due(done: usize, total: usize) -> bool {
    let step = (total / 10).max(1);
    done == total || done % step == 0
}

pub struct Enricher {
    store: Arc<dyn TransactionStore>,
    classifier: Arc<Classifier>,
    progress: Arc<Progress>,
}

impl Enricher {
    pub fn new(store: Arc<dyn TransactionStore>, classifier: Classifier) -> Self {
        Self {
            store,
            classifier: Arc::new(classifier),
            progress: Arc::new(Progress::default()),
        }
    }

    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    /// Classifies and stores every transaction in `transactions` that is not already stored.
    ///
    /// Duplicates within the input are dropped (first occurrence wins) and stored transactions are
    /// never classified again, so re-running a batch is cheap and changes nothing. At most
    /// `concurrency` classifications run at once.
    ///
    /// The first classification or storage failure cancels the rest of the batch and is returned.
    /// Cancelling `cancel` ends the batch with `EnrichError::Interrupted`.
    pub async fn enrich(
        &self,
        transactions: Vec<Transaction>,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Result<Enriched, EnrichError> {
        if cancel.is_cancelled() {
            return Err(EnrichError::Interrupted);
        }
        let concurrency = concurrency.max(1);
        let (existing, pending) = self.partition(transactions).await?;
        info!(
            new = pending.len(),
            existing = existing.len(),
            concurrency,
            "enriching transactions"
        );
        self.progress.start(pending.len());

        let scope = cancel.child_token();
        let mut outcomes = stream::iter(pending.into_iter().enumerate())
            .map(|(index, transaction)| {
                let scope = scope.clone();
                async move {
                    self.process(transaction, &scope)
                        .await
                        .map(|record| (index, record))
                }
            })
            .buffer_unordered(concurrency);

        let mut classified: Vec<(usize, Record)> = Vec::new();
        let mut failure: Option<EnrichError> = None;
        let mut interrupted = false;
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Ok(item) => {
                    classified.push(item);
                    let (done, total) = (classified.len(), self.progress.total());
                    if progress_due(done, total) {
                        info!(done, total, "classified {done} of {total} transactions");
                    }
                }
                Err(EnrichError::Interrupted) => interrupted = true,
                Err(e) => {
                    if failure.is_none() {
                        error!("{e}, cancelling the remaining work");
                        scope.cancel();
                        failure = Some(e);
                    } else {
                        debug!("additional failure after cancellation: {e}");
                    }
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if interrupted {
            return Err(EnrichError::Interrupted);
        }
        classified.sort_by_key(|(index, _)| *index);
        Ok(Enriched {
            classified: classified.into_iter().map(|(_, r)| r).collect(),
            existing,
        })
    }

    /// Drops duplicate IDs and splits the input into already-stored records and transactions that
    /// still need classification.
    async fn partition(
        &self,
        transactions: Vec<Transaction>,
    ) -> Result<(Vec<Record>, Vec<Transaction>), EnrichError> {
        let mut seen = HashSet::new();
        let mut existing = Vec::new();
        let mut pending = Vec::new();
        for transaction in transactions {
            let id = transaction.id();
            if !seen.insert(id.clone()) {
                debug!(id = %id, "skipping duplicate in input");
                continue;
            }
            let lookup = |source: anyhow::Error| EnrichError::Lookup {
                id: id.clone(),
                source: source.into(),
            };
            if self.store.exists(&id).await.map_err(lookup)? {
                match self.store.get(&id).await.map_err(lookup)? {
                    Some(record) => existing.push(record),
                    None => pending.push(transaction),
                }
            } else {
                pending.push(transaction);
            }
        }
        Ok((existing, pending))
    }

    async fn process(
        &self,
        transaction: Transaction,
        scope: &CancellationToken,
    ) -> Result<Record, EnrichError> {
        if scope.is_cancelled() {
            return Err(EnrichError::Interrupted);
        }
        let id = transaction.id();
        let details = self
            .classifier
            .classify(&transaction, scope)
            .await
            .map_err(|source| {
                if source.is_cancelled() {
                    EnrichError::Interrupted
                } else {
                    EnrichError::Classify {
                        id: id.clone(),
                        payee: transaction.payee().to_string(),
                        source,
                    }
                }
            })?;
        if scope.is_cancelled() {
            return Err(EnrichError::Interrupted);
        }

        let record = Record::new(transaction, details);
        self.store
            .upsert(&record)
            .await
            .map_err(|source| EnrichError::Store {
                id: id.clone(),
                source: source.into(),
            })?;
        let done = self.progress.increment();
        debug!(
            id = %id,
            done,
            total = self.progress.total(),
            "transaction stored"
        );
        Ok(record)
    }
}
