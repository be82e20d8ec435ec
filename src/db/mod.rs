//! This module is responsible for reading, writing and managing the SQLite database.

mod migrations;
mod vectors;

pub(crate) use vectors::SqliteVectors;

use crate::error::Res;
use crate::identity::TransactionId;
use crate::model::{Amount, Record, Transaction, TransactionDetails};
use crate::store::{TextMatches, TransactionStore};
use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction as SqlTransaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 8;

/// Columns selected whenever a full `Record` is read back.
const RECORD_COLUMNS: &str = "t.id, t.date, t.amount, t.payee, t.bank, t.details";

type RecordRow = (String, String, String, String, String, String);

#[derive(Debug, Clone)]
pub(crate) struct Db {
    pool: SqlitePool,
}

impl Db {
    /// - Validates that there is a SQLite file at `path`
    /// - Creates a connection pool
    /// - Updates the database schema with migrations if it is out-of-date
    pub(crate) async fn load(path: impl AsRef<Path>) -> Res<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            bail!("The SQLite database is missing '{}'", path.display());
        }
        let pool = connect(path, false).await?;

        let (current,): (i32,) = sqlx::query_as("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .context("Unable to read the schema version")?;
        if current > migrations::LATEST {
            bail!(
                "The database schema version {current} is newer than this version of spendlens \
                 supports ({})",
                migrations::LATEST
            );
        }
        migrations::run(&pool, current, migrations::LATEST).await?;
        Ok(Self { pool })
    }

    /// - Validates that no file currently exists at `path`
    /// - Creates a new SQLite file at `path`
    /// - Initializes the database schema
    pub(crate) async fn init(path: impl AsRef<Path>) -> Res<Self> {
        let path = path.as_ref();
        if path.exists() {
            bail!("A SQLite database already exists at '{}'", path.display());
        }
        let pool = connect(path, true).await?;

        sqlx::query("CREATE TABLE schema_version (version INTEGER NOT NULL)")
            .execute(&pool)
            .await
            .context("Failed to create schema_version table")?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (0)")
            .execute(&pool)
            .await
            .context("Failed to insert initial schema version")?;

        migrations::run(&pool, 0, migrations::LATEST).await?;
        debug!("Initialized SQLite database at {}", path.display());
        Ok(Self { pool })
    }

    /// The vector store that shares this database.
    pub(crate) fn vectors(&self) -> SqliteVectors {
        SqliteVectors::new(self.pool.clone())
    }

    /// Returns the number of rows in the transactions table.
    pub(crate) async fn count_transactions(&self) -> Res<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await
            .context("Unable to count transactions")?;
        Ok(count as u64)
    }
}

async fn connect(path: &Path, create: bool) -> Res<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .context("Failed to parse SQLite connection string")?
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .with_context(|| format!("Unable to open SQLite database '{}'", path.display()))
}

#[async_trait]
impl TransactionStore for Db {
    async fn exists(&self, id: &TransactionId) -> Res<bool> {
        let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM transactions WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Unable to look up transaction {id}"))?;
        Ok(found.is_some())
    }

    async fn get(&self, id: &TransactionId) -> Res<Option<Record>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM transactions t WHERE t.id = ?");
        let row: Option<RecordRow> = sqlx::query_as(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Unable to read transaction {id}"))?;
        row.map(record_from_row).transpose()
    }

    async fn upsert(&self, record: &Record) -> Res<()> {
        let tx = &record.transaction;
        let details = &record.details;
        let details_json =
            serde_json::to_string(details).context("Unable to serialize transaction details")?;

        let mut sql_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin upsert transaction")?;
        sqlx::query(
            "INSERT INTO transactions \
                 (id, date, amount, payee, bank, type, merchant, category, details, search_body) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 date = excluded.date, \
                 amount = excluded.amount, \
                 payee = excluded.payee, \
                 bank = excluded.bank, \
                 type = excluded.type, \
                 merchant = excluded.merchant, \
                 category = excluded.category, \
                 details = excluded.details, \
                 search_body = excluded.search_body, \
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
        )
        .bind(record.id.as_str())
        .bind(format_date(tx.date()))
        .bind(tx.amount().to_string())
        .bind(tx.payee())
        .bind(tx.bank())
        .bind(details.r#type.to_string())
        .bind(&details.merchant)
        .bind(details.category.to_string())
        .bind(&details_json)
        .bind(&details.search_body)
        .execute(&mut *sql_tx)
        .await
        .with_context(|| format!("Unable to store transaction {}", record.id))?;

        replace_fts_row(&mut sql_tx, &record.id, &details.search_body).await?;
        sql_tx
            .commit()
            .await
            .context("Failed to commit upsert transaction")?;
        debug!(id = %record.id, "upserted transaction");
        Ok(())
    }

    async fn text_search(
        &self,
        query: &str,
        cutoff: Option<NaiveDate>,
        limit: usize,
    ) -> Res<TextMatches> {
        let Some(fts) = fts_query(query) else {
            return Ok(TextMatches::default());
        };
        let cutoff = cutoff.map(format_date);

        let sql = format!(
            "SELECT {RECORD_COLUMNS}, bm25(transactions_fts) AS rank \
             FROM transactions_fts JOIN transactions t ON t.rowid = transactions_fts.rowid \
             WHERE transactions_fts MATCH ? AND (? IS NULL OR t.date >= ?) \
             ORDER BY rank, t.id \
             LIMIT ?"
        );
        let rows: Vec<(String, String, String, String, String, String, f64)> =
            sqlx::query_as(&sql)
                .bind(&fts)
                .bind(&cutoff)
                .bind(&cutoff)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .with_context(|| format!("Full-text search for '{query}' failed"))?;

        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) \
             FROM transactions_fts JOIN transactions t ON t.rowid = transactions_fts.rowid \
             WHERE transactions_fts MATCH ? AND (? IS NULL OR t.date >= ?)",
        )
        .bind(&fts)
        .bind(&cutoff)
        .bind(&cutoff)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Unable to count matches for '{query}'"))?;

        let mut results = Vec::with_capacity(rows.len());
        for (id, date, amount, payee, bank, details, rank) in rows {
            let record = record_from_row((id, date, amount, payee, bank, details))?;
            results.push((record, -rank));
        }
        Ok(TextMatches {
            results,
            total: total as usize,
        })
    }

    async fn records(&self) -> Res<Vec<Record>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM transactions t ORDER BY t.id");
        let rows: Vec<RecordRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .context("Unable to read transactions")?;
        rows.into_iter().map(record_from_row).collect()
    }

    async fn update_details(&self, id: &TransactionId, details: &TransactionDetails) -> Res<bool> {
        let details_json =
            serde_json::to_string(details).context("Unable to serialize transaction details")?;
        let mut sql_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin update transaction")?;
        let updated = sqlx::query(
            "UPDATE transactions SET \
                 type = ?, merchant = ?, category = ?, details = ?, search_body = ?, \
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
             WHERE id = ?",
        )
        .bind(details.r#type.to_string())
        .bind(&details.merchant)
        .bind(details.category.to_string())
        .bind(&details_json)
        .bind(&details.search_body)
        .bind(id.as_str())
        .execute(&mut *sql_tx)
        .await
        .with_context(|| format!("Unable to update transaction {id}"))?
        .rows_affected();

        if updated == 0 {
            return Ok(false);
        }
        replace_fts_row(&mut sql_tx, id, &details.search_body).await?;
        sql_tx
            .commit()
            .await
            .context("Failed to commit update transaction")?;
        Ok(true)
    }
}

async fn replace_fts_row(
    sql_tx: &mut SqlTransaction<'_, Sqlite>,
    id: &TransactionId,
    search_body: &str,
) -> Res<()> {
    let rowid: i64 = sqlx::query_scalar("SELECT rowid FROM transactions WHERE id = ?")
        .bind(id.as_str())
        .fetch_one(&mut **sql_tx)
        .await
        .with_context(|| format!("Unable to find the row of {id}"))?;
    sqlx::query("DELETE FROM transactions_fts WHERE rowid = ?")
        .bind(rowid)
        .execute(&mut **sql_tx)
        .await
        .with_context(|| format!("Unable to clear the search index for {id}"))?;
    sqlx::query("INSERT INTO transactions_fts (rowid, search_body) VALUES (?, ?)")
        .bind(rowid)
        .bind(search_body)
        .execute(&mut **sql_tx)
        .await
        .with_context(|| format!("Unable to index {id} for search"))?;
    Ok(())
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn record_from_row(row: RecordRow) -> Res<Record> {
    let (id, date, amount, payee, bank, details) = row;
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .with_context(|| format!("Transaction {id} has an invalid date '{date}'"))?;
    let amount = Amount::from_str(&amount)
        .with_context(|| format!("Transaction {id} has an invalid amount '{amount}'"))?;
    let details: TransactionDetails = serde_json::from_str(&details)
        .with_context(|| format!("Transaction {id} has unreadable details"))?;
    let record = Record::new(Transaction::new(date, amount, payee, bank), details);
    if record.id.as_str() != id {
        bail!(
            "Transaction {id} does not match its stored fields (fingerprint {})",
            record.id
        );
    }
    Ok(record)
}

/// Converts free text into an FTS5 query: every alphanumeric run becomes a quoted prefix term and
/// the terms are OR-ed. Returns `None` when the text has no terms.
pub(crate) fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"*", t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
