//! Update command handler.

use crate::args::UpdateArgs;
use crate::commands::show::describe;
use crate::commands::Out;
use crate::error::{ErrorType, IntoResult};
use crate::model::Record;
use crate::store::TransactionStore;
use crate::{Config, Result};
use anyhow::{anyhow, Context};

/// Corrects the classification of a stored transaction.
///
/// The corrected details are validated like fresh model output and `search_body` is derived
/// again, so full-text search sees the change immediately. The transaction ID does not change.
/// The stored embedding becomes stale and is refreshed by the next `spendlens embed` or import.
///
/// # Errors
///
/// - `Request` if no field is given, the ID is unknown, or the corrected details are invalid.
/// - `Database` if a database operation fails.
pub async fn update(config: Config, args: UpdateArgs) -> Result<Out<Record>> {
    let changes = args.details_update();
    if changes.is_empty() {
        return Err(anyhow!(
            "Nothing to update, provide at least one of merchant, type, category or tags"
        ))
        .pub_result(ErrorType::Request);
    }

    let db = config.db();
    let id = args.id();
    let mut record = db
        .get(id)
        .await
        .pub_result(ErrorType::Database)?
        .ok_or_else(|| anyhow!("There is no transaction with ID {id}"))
        .pub_result(ErrorType::Request)?;

    let details = changes
        .apply(&record.details, &record.transaction)
        .with_context(|| format!("The corrected details for {id} are invalid"))
        .pub_result(ErrorType::Request)?;

    let found = db
        .update_details(id, &details)
        .await
        .pub_result(ErrorType::Database)?;
    if !found {
        return Err(anyhow!("Transaction {id} was removed during the update"))
            .pub_result(ErrorType::Request);
    }
    record.details = details;

    let message = format!("Updated transaction {id}\n{}", describe(&record));
    Ok(Out::new(message, record))
}
