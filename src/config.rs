//! Configuration file handling for spendlens.
//!
//! The configuration file is stored at `$SPENDLENS_HOME/config.json` and holds the provider
//! settings for classification and embedding, the worker concurrency, search defaults and any
//! custom bank statement formats.

use crate::db::Db;
use crate::error::Res;
use crate::statement::{BankFormat, BankRegistry};
use crate::utils;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

const APP_NAME: &str = "spendlens";
const CONFIG_VERSION: u8 = 1;
const CONFIG_JSON: &str = "config.json";
const SPENDLENS_SQLITE: &str = "spendlens.sqlite";
const DEFAULT_CONCURRENCY: usize = 5;

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$SPENDLENS_HOME` and from there it loads `$SPENDLENS_HOME/config.json` and opens
/// the SQLite database.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
    db: Db,
    sqlite_path: PathBuf,
}

impl Config {
    /// Creates the home directory, writes a default `config.json` and initializes the database.
    ///
    /// # Errors
    /// - Returns an error if the directory already contains a `config.json` or if any file or
    ///   database operation fails.
    pub async fn create(dir: impl Into<PathBuf>) -> Res<Self> {
        let maybe_relative = dir.into();
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the spendlens home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;

        let config_path = root.join(CONFIG_JSON);
        if config_path.exists() {
            bail!(
                "A config file already exists at '{}'",
                config_path.display()
            );
        }
        let config_file = ConfigFile::default();
        config_file.save(&config_path).await?;

        let sqlite_path = root.join(SPENDLENS_SQLITE);
        let db = Db::init(&sqlite_path)
            .await
            .context("Unable to create SQLite DB")?;

        Ok(Self {
            root,
            config_path,
            config_file,
            db,
            sqlite_path,
        })
    }

    /// This will
    /// - validate that the home directory and the config file exist
    /// - load and validate the config file
    /// - open the SQLite database, migrating it forward if needed
    pub async fn load(home: impl Into<PathBuf>) -> Res<Self> {
        let maybe_relative = home.into();
        if !maybe_relative.is_dir() {
            bail!(
                "The spendlens home directory is missing '{}', run 'spendlens init' first",
                maybe_relative.display()
            );
        }
        let root = utils::canonicalize(&maybe_relative).await?;

        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!("The config file is missing '{}'", config_path.display())
        }
        let config_file = ConfigFile::load(&config_path).await?;

        let sqlite_path = root.join(SPENDLENS_SQLITE);
        let db = Db::load(&sqlite_path)
            .await
            .context("Unable to load SQLite DB")?;

        Ok(Self {
            root,
            config_path,
            config_file,
            db,
            sqlite_path,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn sqlite_path(&self) -> &Path {
        &self.sqlite_path
    }

    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    pub fn classifier(&self) -> &ClassifierConfig {
        &self.config_file.classifier
    }

    pub fn embedder(&self) -> &EmbedderConfig {
        &self.config_file.embedder
    }

    /// Default number of concurrent workers, never less than one.
    pub fn concurrency(&self) -> usize {
        self.config_file.concurrency.max(1)
    }

    pub fn search(&self) -> &SearchConfig {
        &self.config_file.search
    }

    /// The built-in bank formats plus any declared in `config.json`.
    pub fn bank_registry(&self) -> Res<BankRegistry> {
        let mut registry = BankRegistry::builtin();
        for bank in &self.config_file.banks {
            registry.register(bank.clone())?;
        }
        Ok(registry)
    }

    #[cfg(test)]
    pub(crate) async fn save_with(&mut self, f: impl FnOnce(&mut ConfigFile)) -> Res<()> {
        f(&mut self.config_file);
        self.config_file.save(&self.config_path).await
    }
}

/// Which HTTP API a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    OpenAi,
    Ollama,
}

serde_plain::derive_display_from_serialize!(Backend);

/// How transactions are classified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// One JSON-mode completion per attempt.
    #[default]
    Json,
    /// A tool-calling conversation that corrects invalid output.
    Agent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub backend: Backend,
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key, if the backend needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_classifier_timeout")]
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: Backend::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            strategy: StrategyKind::Json,
            max_iterations: default_max_iterations(),
            timeout_secs: default_classifier_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedderConfig {
    pub backend: Backend,
    pub base_url: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_embedder_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key_env: None,
            timeout_secs: default_embedder_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_vector_threshold")]
    pub vector_threshold: f32,
    /// How many nearest neighbors the vector path considers before date filtering.
    #[serde(default = "default_vector_candidates")]
    pub vector_candidates: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            vector_threshold: default_vector_threshold(),
            vector_candidates: default_vector_candidates(),
        }
    }
}

fn default_max_iterations() -> usize {
    4
}

fn default_classifier_timeout() -> u64 {
    60
}

fn default_embedder_timeout() -> u64 {
    30
}

fn default_limit() -> usize {
    crate::model::DEFAULT_LIMIT
}

fn default_vector_threshold() -> f32 {
    0.3
}

fn default_vector_candidates() -> usize {
    200
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "spendlens",
///   "config_version": 1,
///   "classifier": {
///     "backend": "openai",
///     "base_url": "https://api.openai.com/v1",
///     "model": "gpt-4o-mini",
///     "api_key_env": "OPENAI_API_KEY",
///     "strategy": "json",
///     "max_iterations": 4,
///     "timeout_secs": 60
///   },
///   "embedder": {
///     "backend": "ollama",
///     "base_url": "http://localhost:11434",
///     "model": "nomic-embed-text",
///     "timeout_secs": 30
///   },
///   "concurrency": 5,
///   "search": { "limit": 20, "vector_threshold": 0.3, "vector_candidates": 200 },
///   "banks": []
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct ConfigFile {
    /// Application name, should always be "spendlens"
    app_name: String,

    /// Configuration file version
    config_version: u8,

    #[serde(default)]
    pub(crate) classifier: ClassifierConfig,

    #[serde(default)]
    pub(crate) embedder: EmbedderConfig,

    /// Default number of concurrent classification and embedding workers
    #[serde(default = "default_concurrency")]
    pub(crate) concurrency: usize,

    #[serde(default)]
    pub(crate) search: SearchConfig,

    /// Custom statement formats, in addition to the built-in ones
    #[serde(default)]
    pub(crate) banks: Vec<BankFormat>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            classifier: ClassifierConfig::default(),
            embedder: EmbedderConfig::default(),
            concurrency: DEFAULT_CONCURRENCY,
            search: SearchConfig::default(),
            banks: Vec::new(),
        }
    }
}

impl ConfigFile {
    /// Loads a ConfigFile from the specified path and validates it.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, if `app_name` is wrong, or if a
    /// provider base URL is not a valid URL.
    pub(crate) async fn load(path: impl AsRef<Path>) -> Res<Self> {
        let path = path.as_ref();
        let content = utils::read(path)
            .await
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;

        let config: ConfigFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))?;

        anyhow::ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );
        Url::parse(&config.classifier.base_url).with_context(|| {
            format!(
                "Invalid classifier base_url '{}'",
                config.classifier.base_url
            )
        })?;
        Url::parse(&config.embedder.base_url).with_context(|| {
            format!("Invalid embedder base_url '{}'", config.embedder.base_url)
        })?;

        Ok(config)
    }

    /// Saves the ConfigFile to the specified path.
    pub(crate) async fn save(&self, path: impl AsRef<Path>) -> Res<()> {
        let p = path.as_ref();
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(p, data)
            .await
            .context("Unable to write config file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_create_and_load() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("spendlens_home");

        let created = Config::create(&home).await.unwrap();
        assert!(created.config_path().is_file());
        assert!(created.sqlite_path().is_file());
        assert_eq!(created.concurrency(), 5);

        let loaded = Config::load(&home).await.unwrap();
        assert_eq!(loaded.classifier(), created.classifier());
        assert_eq!(loaded.search().vector_candidates, 200);
        assert_eq!(loaded.root(), created.root());
    }

    #[tokio::test]
    async fn test_config_create_refuses_existing_home() {
        let dir = TempDir::new().unwrap();
        Config::create(dir.path()).await.unwrap();
        let err = Config::create(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_config_load_missing_home() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(dir.path().join("nope")).await.unwrap_err();
        assert!(err.to_string().contains("spendlens init"));
    }

    #[tokio::test]
    async fn test_config_file_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let mut original = ConfigFile::default();
        original.concurrency = 9;
        original.classifier.strategy = StrategyKind::Agent;
        original.search.vector_threshold = 0.5;
        original.save(&config_path).await.unwrap();

        let loaded = ConfigFile::load(&config_path).await.unwrap();
        assert_eq!(original, loaded);
    }

    #[tokio::test]
    async fn test_config_file_load_with_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        utils::write(
            &config_path,
            r#"{ "app_name": "spendlens", "config_version": 1 }"#,
        )
        .await
        .unwrap();

        let config = ConfigFile::load(&config_path).await.unwrap();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.classifier.max_iterations, 4);
        assert_eq!(config.embedder.backend, Backend::Ollama);
        assert!(config.banks.is_empty());
    }

    #[tokio::test]
    async fn test_config_file_load_invalid_app_name() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        utils::write(&config_path, r#"{ "app_name": "budget", "config_version": 1 }"#)
            .await
            .unwrap();

        let result = ConfigFile::load(&config_path).await;
        assert!(result.unwrap_err().to_string().contains("Invalid app_name"));
    }

    #[tokio::test]
    async fn test_config_file_load_invalid_url() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let mut file = ConfigFile::default();
        file.embedder.base_url = "localhost 11434".to_string();
        file.save(&config_path).await.unwrap();

        let err = ConfigFile::load(&config_path).await.unwrap_err();
        assert!(err.to_string().contains("embedder base_url"));
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(Backend::OpenAi.to_string(), "openai");
        let parsed: Backend = serde_json::from_str("\"ollama\"").unwrap();
        assert_eq!(parsed, Backend::Ollama);
    }

    #[tokio::test]
    async fn test_custom_banks_join_registry() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::create(dir.path()).await.unwrap();
        config
            .save_with(|f| {
                f.banks.push(BankFormat {
                    name: "monzo".to_string(),
                    delimiter: ';',
                    has_headers: true,
                    date_column: 1,
                    amount_column: 3,
                    payee_column: 2,
                    date_format: "%d/%m/%Y".to_string(),
                })
            })
            .await
            .unwrap();
        let config = Config::load(dir.path()).await.unwrap();
        let registry = config.bank_registry().unwrap();
        assert!(registry.get("monzo").is_some());
        assert!(registry.get("generic").is_some());
    }
}
