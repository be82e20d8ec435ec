use crate::api::{self, Mode};
use crate::args::EmbedArgs;
use crate::commands::Out;
use crate::embed::{EmbeddingIndexer, IndexReport};
use crate::error::{Error, ErrorType, IntoResult};
use crate::utils;
use crate::{Config, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Computes embeddings for every stored transaction whose embedding is missing or stale.
pub async fn embed(
    config: Config,
    mode: Mode,
    args: EmbedArgs,
    cancel: CancellationToken,
) -> Result<Out<IndexReport>> {
    let embedder = api::embedder(config.embedder(), mode).pub_result(ErrorType::Config)?;
    let db = Arc::new(config.db().clone());
    let concurrency = args.concurrency().unwrap_or(config.concurrency());
    let report = EmbeddingIndexer::new(db.clone(), Arc::new(db.vectors()), embedder)
        .index(concurrency, &cancel)
        .await
        .map_err(|e| Error::new(e.error_type(), e))?;
    Ok(Out::new(
        format!(
            "Embedded {} transaction{}, {} already up to date",
            report.embedded,
            utils::plural(report.embedded),
            report.unchanged
        ),
        report,
    ))
}
