//! Shared test utilities: a temporary spendlens home and instrumented stand-ins for the provider
//! and storage traits.
//!
//! This module is only compiled when running tests (`#[cfg(test)]`).

use crate::api::{ChatModel, ChatRequest, ChatResponse, Embedder, Role, TestModel};
use crate::classify::{Classifier, Strategy};
use crate::error::{ProviderError, Res};
use crate::identity::TransactionId;
use crate::model::{Amount, Record, Transaction, TransactionDetails};
use crate::store::{TextMatches, TransactionStore, VectorStore};
use crate::Config;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Test environment that sets up a spendlens home directory with Config and database.
/// Holds TempDir to keep the directory alive for the duration of the test.
pub struct TestEnv {
    _temp_dir: TempDir,
    config: Config,
}

impl TestEnv {
    /// Creates a test environment with Config and initialized database.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("spendlens");
        let config = Config::create(&root).await.unwrap();
        Self {
            _temp_dir: temp_dir,
            config,
        }
    }

    /// Returns a clone of the Config.
    pub fn config(&self) -> Config {
        self.config.clone()
    }

    /// Classifies `transaction` with the offline model and stores it.
    pub async fn insert(&self, transaction: Transaction) -> Record {
        let record = classified(transaction).await;
        self.config.db().upsert(&record).await.unwrap();
        record
    }
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn transaction(day: &str, amount: &str, payee: &str) -> Transaction {
    Transaction::new(date(day), Amount::from_str(amount).unwrap(), payee, "testbank")
}

/// A record with details from the offline model.
pub async fn classified(transaction: Transaction) -> Record {
    let details = Classifier::new(Arc::new(TestModel), Strategy::Json)
        .classify(&transaction, &CancellationToken::new())
        .await
        .unwrap();
    Record::new(transaction, details)
}

/// A record with fixed, valid details.
pub fn record(day: &str, amount: &str, payee: &str) -> Record {
    let transaction = transaction(day, amount, payee);
    let details: TransactionDetails = serde_json::from_value(serde_json::json!({
        "type": "purchase",
        "merchant": payee,
        "category": "other",
        "description": format!("Purchase at {payee}"),
    }))
    .unwrap();
    let details = details.finalize(&transaction).unwrap();
    Record::new(transaction, details)
}

type ErrorFactory = Box<dyn Fn() -> ProviderError + Send + Sync>;

/// A `ChatModel` that replays a script of responses and then falls back to `TestModel`. It counts
/// calls, records requests, and tracks the largest number of calls in flight at once.
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ChatResponse, ProviderError>>>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    failures: Vec<(String, ErrorFactory)>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<ChatResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Calls whose user message mentions `payee` fail with the error from `error`.
    pub fn failing_for(
        mut self,
        payee: &str,
        error: impl Fn() -> ProviderError + Send + Sync + 'static,
    ) -> Self {
        self.failures.push((payee.to_string(), Box::new(error)));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let user = request
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        if let Some((_, error)) = self.failures.iter().find(|(p, _)| user.contains(p.as_str())) {
            return Err(error());
        }

        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(response) => response,
            None => TestModel.complete(request).await,
        }
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }
}

/// Always returns the same vector.
pub struct FixedEmbedder(pub Vec<f32>);

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(self.0.clone())
    }

    fn model_name(&self) -> &str {
        "fixed-embedder"
    }
}

/// An in-memory `TransactionStore`. Lexical search returns the IDs in `lexical`, in order, with
/// descending scores.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<TransactionId, Record>>,
    lexical: Mutex<Vec<TransactionId>>,
    pub upserts: AtomicUsize,
}

impl MemoryStore {
    pub fn with_records(records: &[Record]) -> Self {
        let store = Self::default();
        {
            let mut map = store.records.lock().unwrap();
            for r in records {
                map.insert(r.id.clone(), r.clone());
            }
        }
        store
    }

    pub fn set_lexical(&self, ids: &[&TransactionId]) {
        *self.lexical.lock().unwrap() = ids.iter().map(|id| (*id).clone()).collect();
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn snapshot(&self) -> Vec<Record> {
        self.records.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn exists(&self, id: &TransactionId) -> Res<bool> {
        Ok(self.records.lock().unwrap().contains_key(id))
    }

    async fn get(&self, id: &TransactionId) -> Res<Option<Record>> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn upsert(&self, record: &Record) -> Res<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn text_search(
        &self,
        _query: &str,
        cutoff: Option<NaiveDate>,
        limit: usize,
    ) -> Res<TextMatches> {
        let lexical = self.lexical.lock().unwrap().clone();
        let records = self.records.lock().unwrap();
        let matching: Vec<Record> = lexical
            .iter()
            .filter_map(|id| records.get(id))
            .filter(|r| cutoff.map_or(true, |c| r.transaction.date() >= c))
            .cloned()
            .collect();
        let total = matching.len();
        let results = matching
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, r)| (r, (total - i) as f64))
            .collect();
        Ok(TextMatches { results, total })
    }

    async fn records(&self) -> Res<Vec<Record>> {
        Ok(self.snapshot())
    }

    async fn update_details(&self, id: &TransactionId, details: &TransactionDetails) -> Res<bool> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(id) {
            Some(r) => {
                r.details = details.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// An in-memory `VectorStore` whose similarity query returns a fixed list. Removals are recorded.
#[derive(Default)]
pub struct MemoryVectors {
    similar: Mutex<Vec<(TransactionId, f32)>>,
    removed: Mutex<Vec<TransactionId>>,
    upserted: Mutex<BTreeMap<TransactionId, String>>,
    fail_remove: bool,
}

impl MemoryVectors {
    pub fn with_similar(similar: Vec<(TransactionId, f32)>) -> Self {
        Self {
            similar: Mutex::new(similar),
            ..Default::default()
        }
    }

    pub fn failing_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    pub fn removed(&self) -> Vec<TransactionId> {
        self.removed.lock().unwrap().clone()
    }

    pub fn upserted(&self) -> BTreeMap<TransactionId, String> {
        self.upserted.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorStore for MemoryVectors {
    async fn upsert(
        &self,
        id: &TransactionId,
        text: &str,
        _vector: &[f32],
        _model: &str,
    ) -> Res<()> {
        self.upserted
            .lock()
            .unwrap()
            .insert(id.clone(), crate::identity::content_hash(text));
        Ok(())
    }

    async fn has_embedding(&self, id: &TransactionId, content_hash: &str) -> Res<bool> {
        Ok(self
            .upserted
            .lock()
            .unwrap()
            .get(id)
            .is_some_and(|h| h == content_hash))
    }

    async fn query_similar(
        &self,
        _vector: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Res<Vec<(TransactionId, f32)>> {
        Ok(self
            .similar
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| threshold <= 0.0 || *s >= threshold)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn remove(&self, id: &TransactionId) -> Res<()> {
        self.removed.lock().unwrap().push(id.clone());
        if self.fail_remove {
            anyhow::bail!("vector store is read-only");
        }
        Ok(())
    }
}
