use crate::api::{self, Mode};
use crate::args::SearchArgs;
use crate::commands::Out;
use crate::error::{ErrorType, IntoResult, ProviderError};
use crate::model::{SearchMode, SearchOptions, SearchResult, SearchResults};
use crate::search::SearchEngine;
use crate::{Config, Error, Result};
use std::fmt::Write;
use std::sync::Arc;

/// Searches stored transactions. Defaults for the limit and the similarity threshold come from
/// `config.json`.
pub async fn search(config: Config, mode: Mode, args: SearchArgs) -> Result<Out<SearchResults>> {
    let defaults = config.search();
    let mut options = SearchOptions::new(args.limit().unwrap_or(defaults.limit))
        .with_order_by(args.order_by())
        .with_vector_threshold(args.threshold().unwrap_or(defaults.vector_threshold));
    if let Some(days) = args.days() {
        options = options.with_days(days);
    }
    if let Some(since) = args.since() {
        options = options.with_date_cutoff(since);
    }

    let embedder = api::embedder(config.embedder(), mode).pub_result(ErrorType::Config)?;
    let db = Arc::new(config.db().clone());
    let engine = SearchEngine::new(db.clone(), Arc::new(db.vectors()), embedder)
        .with_vector_candidates(defaults.vector_candidates);

    let query = args.query();
    let found = match args.mode() {
        SearchMode::Hybrid => engine.search(query, &options).await,
        SearchMode::Text => engine.text_search(query, &options).await,
        SearchMode::Vector => engine.vector_search(query, &options).await,
    }
    .map_err(search_error)?;

    let message = render(query, args.mode(), &found);
    Ok(Out::new(message, found))
}

/// A failure to embed the query is a provider error, anything else comes from the database.
fn search_error(e: anyhow::Error) -> Error {
    let error_type = if e.chain().any(|cause| cause.is::<ProviderError>()) {
        ErrorType::Provider
    } else {
        ErrorType::Database
    };
    Error::new(error_type, e)
}

fn render(query: &str, mode: SearchMode, found: &SearchResults) -> String {
    if found.results.is_empty() {
        return format!("No transactions match '{query}' ({mode} search)");
    }
    let mut out = format!(
        "Showing {} of {} match{} for '{query}' ({mode} search)\n",
        found.results.len(),
        found.total,
        if found.total == 1 { "" } else { "es" },
    );
    for result in &found.results {
        let _ = writeln!(out, "{}", row(result));
    }
    out.truncate(out.trim_end().len());
    out
}

fn row(result: &SearchResult) -> String {
    let record = &result.record;
    let score = match (
        result.score.rrf_score,
        result.score.text_score,
        result.score.vector_score,
    ) {
        (Some(rrf), _, _) => format!("rrf {rrf:.4}"),
        (None, Some(text), _) => format!("text {text:.2}"),
        (None, None, Some(vector)) => format!("cos {vector:.3}"),
        (None, None, None) => String::new(),
    };
    format!(
        "{}  {}  {:>10}  {:<24}  {:<14}  {}",
        record.id,
        record.transaction.date(),
        record.transaction.amount().to_string(),
        truncate(&record.details.merchant, 24),
        record.details.category.to_string(),
        score,
    )
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut t: String = s.chars().take(max.saturating_sub(1)).collect();
    t.push('…');
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OrderBy;
    use crate::test::{date, transaction, TestEnv};

    async fn env() -> TestEnv {
        let env = TestEnv::new().await;
        env.insert(transaction("2025-01-05", "-4.75", "BLUE BOTTLE COFFEE 042"))
            .await;
        env.insert(transaction("2025-02-06", "-5.10", "STARBUCKS COFFEE #88"))
            .await;
        env.insert(transaction("2025-02-07", "-48.10", "SHELL OIL 5744"))
            .await;
        env
    }

    #[tokio::test]
    async fn test_text_search() {
        let env = env().await;
        let args = SearchArgs::new("coffee").with_mode(SearchMode::Text);
        let out = search(env.config(), Mode::Test, args).await.unwrap();
        let found = out.structure().unwrap();
        assert_eq!(found.total, 2);
        assert!(found
            .results
            .iter()
            .all(|r| r.record.transaction.payee().contains("COFFEE")));
        assert!(out.message().contains("Showing 2 of 2 matches"));
    }

    #[tokio::test]
    async fn test_text_search_since_and_date_order() {
        let env = env().await;
        let args = SearchArgs::new("coffee oil")
            .with_mode(SearchMode::Text)
            .with_since(date("2025-02-01"))
            .with_order_by(OrderBy::Date);
        let out = search(env.config(), Mode::Test, args).await.unwrap();
        let dates: Vec<_> = out
            .structure()
            .unwrap()
            .results
            .iter()
            .map(|r| r.record.transaction.date())
            .collect();
        assert_eq!(dates, vec![date("2025-02-07"), date("2025-02-06")]);
    }

    #[tokio::test]
    async fn test_hybrid_search_with_nothing_embedded() {
        let env = env().await;
        let args = SearchArgs::new("shell").with_limit(1);
        let out = search(env.config(), Mode::Test, args).await.unwrap();
        let found = out.structure().unwrap();
        assert_eq!(found.results.len(), 1);
        assert_eq!(found.results[0].record.transaction.payee(), "SHELL OIL 5744");
        assert!(found.results[0].score.rrf_score.is_some());
    }

    #[tokio::test]
    async fn test_no_matches_message() {
        let env = env().await;
        let args = SearchArgs::new("zeppelin").with_mode(SearchMode::Text);
        let out = search(env.config(), Mode::Test, args).await.unwrap();
        assert_eq!(out.structure().unwrap().total, 0);
        assert!(out.message().starts_with("No transactions match"));
    }

    #[test]
    fn test_search_error_type_follows_cause() {
        let embed_failure = anyhow::Error::new(ProviderError::RetriesExhausted {
            attempts: 3,
            source: Box::new(ProviderError::Timeout),
        })
        .context("Unable to embed the query");
        assert_eq!(search_error(embed_failure).error_type(), ErrorType::Provider);

        let db_failure = anyhow::anyhow!("database is locked").context("Unable to run text search");
        assert_eq!(search_error(db_failure).error_type(), ErrorType::Database);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 24), "short");
        assert_eq!(truncate("abcdef", 4), "abc…");
    }
}
