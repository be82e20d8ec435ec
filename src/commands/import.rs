use crate::api::{self, Mode};
use crate::args::ImportArgs;
use crate::classify::Classifier;
use crate::commands::Out;
use crate::embed::{EmbeddingIndexer, IndexError};
use crate::enrich::Enricher;
use crate::error::{Error, ErrorType, IntoResult};
use crate::statement;
use crate::utils;
use crate::{Config, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The counts reported by `spendlens import`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Rows parsed from the statement.
    pub parsed: usize,
    /// Transactions that were new and have been classified and stored.
    pub classified: usize,
    /// Transactions that were already stored.
    pub existing: usize,
    /// Embeddings computed after classification. `None` when embedding was skipped or failed.
    pub embedded: Option<usize>,
}

/// Parses a bank statement, classifies every transaction that is not already stored and stores
/// the results. Unless `--skip-embed` is given, embeddings are then brought up to date.
///
/// An embedding failure does not fail the import: the transactions are stored and searchable by
/// text, and `spendlens embed` can be run later.
///
/// # Errors
/// - `Request` if the bank format is unknown or the statement cannot be parsed
/// - `Config` if the classification provider cannot be built
/// - `Provider` or `Database` if classification or storage fails
/// - `Interrupted` if `cancel` fires
pub async fn import(
    config: Config,
    mode: Mode,
    args: ImportArgs,
    cancel: CancellationToken,
) -> Result<Out<ImportSummary>> {
    let registry = config.bank_registry().pub_result(ErrorType::Config)?;
    let format = registry.require(args.bank()).pub_result(ErrorType::Request)?;
    let transactions = statement::parse_file(args.file(), format)
        .await
        .pub_result(ErrorType::Request)?;
    let parsed = transactions.len();
    info!(
        "Parsed {parsed} transactions from '{}'",
        args.file().display()
    );

    let model = api::chat_model(config.classifier(), mode).pub_result(ErrorType::Config)?;
    let classifier = Classifier::from_config(model, config.classifier());
    let db = Arc::new(config.db().clone());
    let concurrency = args.concurrency().unwrap_or(config.concurrency());

    let enriched = Enricher::new(db.clone(), classifier)
        .enrich(transactions, concurrency, &cancel)
        .await
        .map_err(|e| Error::new(e.error_type(), e))?;

    let mut summary = ImportSummary {
        parsed,
        classified: enriched.classified.len(),
        existing: enriched.existing.len(),
        embedded: None,
    };

    if !args.skip_embed() {
        let embedder = api::embedder(config.embedder(), mode).pub_result(ErrorType::Config)?;
        let indexer = EmbeddingIndexer::new(db.clone(), Arc::new(db.vectors()), embedder);
        match indexer.index(concurrency, &cancel).await {
            Ok(report) => summary.embedded = Some(report.embedded),
            Err(IndexError::Interrupted) => {
                return Err(Error::new(
                    ErrorType::Interrupted,
                    anyhow::anyhow!("Interrupted while computing embeddings"),
                ))
            }
            Err(e) => warn!(
                "The transactions were stored but embeddings could not be computed, run \
                 'spendlens embed' to try again: {:#}",
                anyhow::Error::new(e)
            ),
        }
    }

    let mut message = format!(
        "Imported {parsed} transaction{}: {} classified, {} already stored",
        utils::plural(parsed),
        summary.classified,
        summary.existing
    );
    if let Some(embedded) = summary.embedded {
        message.push_str(&format!(", {embedded} embedded"));
    }
    Ok(Out::new(message, summary))
}
