//! These structs provide the CLI interface for the spendlens CLI.

use crate::identity::TransactionId;
use crate::model::{Category, DetailsUpdate, OrderBy, SearchMode, TransactionType};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// spendlens: enrich bank statements with LLM classification and search them.
///
/// Import a CSV statement and every new transaction is classified by a language model (type,
/// merchant, category, description and so on) and stored in a local SQLite database. Search
/// combines full-text ranking with embedding similarity.
///
/// There is also a mode in which an AI agent can search your transactions through the mcp
/// subcommand.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the data directory with a default config.json and an empty database.
    ///
    /// This is the first command you should run. Afterwards, edit config.json to choose the
    /// classification and embedding providers.
    Init,
    /// Classify and store the transactions in a CSV bank statement.
    ///
    /// Transactions that are already stored are skipped, so importing the same statement twice
    /// is harmless. Press Ctrl-C to stop; everything stored so far is kept.
    Import(ImportArgs),
    /// Search stored transactions.
    Search(SearchArgs),
    /// Compute embeddings for stored transactions that do not have a current one.
    Embed(EmbedArgs),
    /// Correct the classification of a stored transaction.
    Update(UpdateArgs),
    /// Print a stored transaction.
    Show(ShowArgs),
    /// Run the MCP server on stdin/stdout.
    Mcp(McpArgs),
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where spendlens data and configuration is held. Defaults to ~/spendlens
    #[arg(long, env = "SPENDLENS_HOME", default_value_t = default_spendlens_home())]
    home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, home: PathBuf) -> Self {
        Self {
            log_level,
            home: home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn home(&self) -> &DisplayPath {
        &self.home
    }
}

/// (Not shown): Args for the `spendlens import` command.
#[derive(Debug, Parser, Clone)]
pub struct ImportArgs {
    /// The CSV statement to import.
    file: PathBuf,

    /// The statement format. Built-in formats are 'generic' (YYYY-MM-DD dates) and 'us'
    /// (MM/DD/YYYY dates); more can be declared under "banks" in config.json.
    #[arg(long, default_value = "generic")]
    bank: String,

    /// How many transactions are classified at once. Defaults to "concurrency" in config.json.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Do not compute embeddings for the imported transactions.
    #[arg(long)]
    skip_embed: bool,
}

impl ImportArgs {
    pub fn new(file: impl Into<PathBuf>, bank: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            bank: bank.into(),
            concurrency: None,
            skip_embed: false,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn bank(&self) -> &str {
        &self.bank
    }

    pub fn concurrency(&self) -> Option<usize> {
        self.concurrency
    }

    pub fn skip_embed(&self) -> bool {
        self.skip_embed
    }
}

/// Args for the `spendlens search` command and the `search_transactions` MCP tool.
#[derive(Debug, Parser, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// Free text to search for, e.g. "coffee" or "flights to lisbon".
    query: String,

    /// 'hybrid' (default) fuses full-text and semantic results, 'text' uses full-text search
    /// only, 'vector' uses semantic similarity only.
    #[arg(long, value_enum, default_value_t)]
    #[serde(default)]
    mode: SearchMode,

    /// Maximum number of results. Defaults to "search.limit" in config.json.
    #[arg(long)]
    #[serde(default)]
    limit: Option<usize>,

    /// Only include transactions from the last N days.
    #[arg(long, conflicts_with = "since")]
    #[serde(default)]
    days: Option<u32>,

    /// Only include transactions on or after this date (YYYY-MM-DD). Takes precedence over
    /// `days`.
    #[arg(long)]
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    since: Option<NaiveDate>,

    /// 'relevance' (default) or 'date' (newest first).
    #[arg(long, value_enum, default_value_t)]
    #[serde(default)]
    order_by: OrderBy,

    /// Minimum cosine similarity for semantic matches, 0 disables the filter. Defaults to
    /// "search.vector_threshold" in config.json.
    #[arg(long)]
    #[serde(default)]
    threshold: Option<f32>,
}

impl SearchArgs {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: SearchMode::default(),
            limit: None,
            days: None,
            since: None,
            order_by: OrderBy::default(),
            threshold: None,
        }
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_since(mut self, since: NaiveDate) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn days(&self) -> Option<u32> {
        self.days
    }

    pub fn since(&self) -> Option<NaiveDate> {
        self.since
    }

    pub fn order_by(&self) -> OrderBy {
        self.order_by
    }

    pub fn threshold(&self) -> Option<f32> {
        self.threshold
    }
}

/// (Not shown): Args for the `spendlens embed` command.
#[derive(Debug, Parser, Clone, Default)]
pub struct EmbedArgs {
    /// How many embeddings are computed at once. Defaults to "concurrency" in config.json.
    #[arg(long)]
    concurrency: Option<usize>,
}

impl EmbedArgs {
    pub fn new(concurrency: Option<usize>) -> Self {
        Self { concurrency }
    }

    pub fn concurrency(&self) -> Option<usize> {
        self.concurrency
    }
}

/// Args for the `spendlens update` command and the `update_transaction` MCP tool.
#[derive(Debug, Parser, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpdateArgs {
    /// The transaction ID, 8 hex characters.
    id: TransactionId,

    /// The corrected merchant name.
    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    merchant: Option<String>,

    /// The corrected transaction type.
    #[arg(long = "type", value_name = "TYPE")]
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    r#type: Option<TransactionType>,

    /// The corrected category.
    #[arg(long)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<Category>,

    /// Replaces all tags. Repeat the flag for several tags.
    #[arg(long = "tag", value_name = "TAG")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,

    /// Remove all tags.
    #[arg(long, conflicts_with = "tags")]
    #[serde(default)]
    clear_tags: bool,
}

impl UpdateArgs {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            merchant: None,
            r#type: None,
            category: None,
            tags: Vec::new(),
            clear_tags: false,
        }
    }

    pub fn with_merchant(mut self, merchant: impl Into<String>) -> Self {
        self.merchant = Some(merchant.into());
        self
    }

    pub fn with_type(mut self, r#type: TransactionType) -> Self {
        self.r#type = Some(r#type);
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    /// The requested changes.
    pub fn details_update(&self) -> DetailsUpdate {
        let tags = if self.clear_tags {
            Some(Vec::new())
        } else if self.tags.is_empty() {
            None
        } else {
            Some(self.tags.clone())
        };
        DetailsUpdate {
            merchant: self.merchant.clone(),
            r#type: self.r#type,
            category: self.category,
            tags,
        }
    }
}

/// Args for the `spendlens show` command and the `get_transaction` MCP tool.
#[derive(Debug, Parser, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ShowArgs {
    /// The transaction ID, 8 hex characters.
    id: TransactionId,
}

impl ShowArgs {
    pub fn new(id: TransactionId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> &TransactionId {
        &self.id
    }
}

/// (Not shown): Args for the `spendlens mcp` command.
#[derive(Debug, Parser, Clone)]
pub struct McpArgs {}

fn default_spendlens_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("spendlens"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --home or SPENDLENS_HOME instead of relying on the default \
                spendlens home directory. If you continue using the program right now, you may \
                have problems!",
            );
            PathBuf::from("spendlens")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}
