use crate::args::ShowArgs;
use crate::commands::Out;
use crate::error::{ErrorType, IntoResult};
use crate::model::Record;
use crate::store::TransactionStore;
use crate::{Config, Result};
use anyhow::anyhow;

/// Looks up one stored transaction by ID.
pub async fn show(config: Config, args: ShowArgs) -> Result<Out<Record>> {
    let record = config
        .db()
        .get(args.id())
        .await
        .pub_result(ErrorType::Database)?
        .ok_or_else(|| anyhow!("There is no transaction with ID {}", args.id()))
        .pub_result(ErrorType::Request)?;
    let message = describe(&record);
    Ok(Out::new(message, record))
}

pub(super) fn describe(record: &Record) -> String {
    let details = &record.details;
    let mut lines = vec![
        format!("{}  {}", record.id, record.transaction.payee()),
        format!("  date:        {}", record.transaction.date()),
        format!("  amount:      {}", record.transaction.amount()),
        format!("  bank:        {}", record.transaction.bank()),
        format!("  type:        {}", details.r#type),
        format!("  merchant:    {}", details.merchant),
        format!("  category:    {}", details.category),
        format!("  description: {}", details.description),
    ];
    if let Some(location) = &details.location {
        lines.push(format!("  location:    {location}"));
    }
    if !details.tags.is_empty() {
        lines.push(format!("  tags:        {}", details.tags.join(", ")));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{transaction, TestEnv};

    #[tokio::test]
    async fn test_show() {
        let env = TestEnv::new().await;
        let stored = env
            .insert(transaction("2025-01-05", "-4.75", "BLUE BOTTLE COFFEE 042"))
            .await;

        let out = show(env.config(), ShowArgs::new(stored.id.clone()))
            .await
            .unwrap();
        assert_eq!(out.structure(), Some(&stored));
        assert!(out.message().contains("BLUE BOTTLE COFFEE 042"));
        assert!(out.message().contains("-4.75"));
    }

    #[tokio::test]
    async fn test_show_missing_is_a_request_error() {
        let env = TestEnv::new().await;
        let id = transaction("2025-01-05", "-1.00", "NOWHERE").id();
        let err = show(env.config(), ShowArgs::new(id)).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Request);
    }
}
