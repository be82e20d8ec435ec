//! Bank statement CSV parsing.
//!
//! Statement layouts differ between banks, so each is described by a `BankFormat`. A
//! `BankRegistry` holds the built-in formats plus any declared in `config.json` and is passed to
//! whoever needs to parse a statement.

use crate::error::Res;
use crate::model::{Amount, Transaction};
use crate::utils;
use anyhow::{bail, Context};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Describes the CSV layout of one bank's statements. Column indexes are zero-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankFormat {
    /// Recorded as the `bank` of every parsed transaction, so it takes part in the fingerprint.
    pub name: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_has_headers")]
    pub has_headers: bool,
    pub date_column: usize,
    pub amount_column: usize,
    pub payee_column: usize,
    /// A `chrono` format string such as `%Y-%m-%d`.
    pub date_format: String,
}

fn default_delimiter() -> char {
    ','
}

fn default_has_headers() -> bool {
    true
}

impl BankFormat {
    /// `date,amount,payee` with ISO dates.
    pub fn generic() -> Self {
        Self {
            name: "generic".to_string(),
            delimiter: ',',
            has_headers: true,
            date_column: 0,
            amount_column: 1,
            payee_column: 2,
            date_format: "%Y-%m-%d".to_string(),
        }
    }

    /// `date,amount,payee` with `MM/DD/YYYY` dates.
    pub fn us() -> Self {
        Self {
            name: "us".to_string(),
            date_format: "%m/%d/%Y".to_string(),
            ..Self::generic()
        }
    }

    fn check(&self) -> Res<()> {
        if self.name.trim().is_empty() {
            bail!("A bank format must have a name");
        }
        if !self.delimiter.is_ascii() {
            bail!(
                "The delimiter of bank format '{}' must be an ASCII character",
                self.name
            );
        }
        let columns = [self.date_column, self.amount_column, self.payee_column];
        if columns[0] == columns[1] || columns[0] == columns[2] || columns[1] == columns[2] {
            bail!(
                "Bank format '{}' uses the same column for more than one field",
                self.name
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct BankRegistry {
    formats: BTreeMap<String, BankFormat>,
}

impl BankRegistry {
    /// A registry containing `generic` and `us`.
    pub fn builtin() -> Self {
        let mut formats = BTreeMap::new();
        for format in [BankFormat::generic(), BankFormat::us()] {
            formats.insert(format.name.clone(), format);
        }
        Self { formats }
    }

    /// Adds a format. Names must be unique, including against the built-in formats.
    pub fn register(&mut self, format: BankFormat) -> Res<()> {
        format.check()?;
        if self.formats.contains_key(&format.name) {
            bail!("A bank format named '{}' already exists", format.name);
        }
        self.formats.insert(format.name.clone(), format);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&BankFormat> {
        self.formats.get(name)
    }

    /// Like `get`, but the error lists the known formats.
    pub fn require(&self, name: &str) -> Res<&BankFormat> {
        self.get(name).with_context(|| {
            format!(
                "Unknown bank '{name}', expected one of: {}",
                self.names().join(", ")
            )
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.formats.keys().map(String::as_str).collect()
    }
}

/// Reads and parses the statement at `path`.
pub async fn parse_file(path: impl AsRef<Path>, format: &BankFormat) -> Res<Vec<Transaction>> {
    let path = path.as_ref();
    let content = utils::read(path)
        .await
        .with_context(|| format!("Unable to read statement '{}'", path.display()))?;
    parse(&content, format).with_context(|| format!("Unable to parse '{}'", path.display()))
}

/// Parses statement text. Blank lines are skipped. The first bad row fails the whole statement and
/// the error names its line number.
pub fn parse(content: &str, format: &BankFormat) -> Res<Vec<Transaction>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(format.delimiter as u8)
        .has_headers(format.has_headers)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut transactions = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("Malformed CSV near row {}", index + 1))?;
        let line = row.position().map(|p| p.line()).unwrap_or(index as u64 + 1);
        if row.iter().all(str::is_empty) {
            continue;
        }
        let transaction = parse_row(&row, format).with_context(|| format!("Line {line}"))?;
        transactions.push(transaction);
    }
    debug!(
        bank = %format.name,
        count = transactions.len(),
        "parsed statement"
    );
    Ok(transactions)
}

fn parse_row(row: &csv::StringRecord, format: &BankFormat) -> Res<Transaction> {
    let field = |index: usize, what: &str| {
        row.get(index)
            .with_context(|| format!("missing {what} column {index}"))
    };

    let raw_date = field(format.date_column, "date")?;
    let date = NaiveDate::parse_from_str(raw_date, &format.date_format).with_context(|| {
        format!(
            "invalid date '{raw_date}', expected format '{}'",
            format.date_format
        )
    })?;
    let amount = Amount::from_str(field(format.amount_column, "amount")?)?;
    let payee = field(format.payee_column, "payee")?;
    if payee.is_empty() {
        bail!("the payee is empty");
    }
    Ok(Transaction::new(date, amount, payee, format.name.as_str()))
}
