//! Error types.
//!
//! Internally, functions return `Res<T>`, an `anyhow` result that collects context as it bubbles
//! up. Public entry points convert to `Result<T>` with `pub_result`, which tags the error with an
//! `ErrorType` so that the CLI and the MCP server can decide how to report it.
//!
//! Model and embedding providers have their own typed error, `ProviderError`, because the
//! enrichment pipeline needs to tell transient failures apart from terminal ones.

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use thiserror::Error as ThisError;

pub(crate) type Res<T> = anyhow::Result<T>;
pub type Result<T> = std::result::Result<T, Error>;

/// Broad categories of failure that are surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The home directory or `config.json` is missing or invalid.
    Config,
    /// A SQLite operation failed.
    Database,
    /// A model or embedding provider failed.
    Provider,
    /// The request itself was invalid, e.g. a malformed transaction ID.
    Request,
    /// The MCP service could not be started or failed while running.
    Service,
    /// The operation was cancelled before it completed.
    Interrupted,
    /// Anything that was not given a more specific type.
    Internal,
}

serde_plain::derive_display_from_serialize!(ErrorType);

/// The public error type.
pub struct Error {
    error_type: ErrorType,
    inner: anyhow::Error,
}

impl Error {
    pub fn new(error_type: ErrorType, inner: impl Into<anyhow::Error>) -> Self {
        Self {
            error_type,
            inner: inner.into(),
        }
    }

    pub fn error_type(&self) -> ErrorType {
        self.error_type
    }

    /// True when the operation ended because it was cancelled rather than because it failed.
    pub fn is_interrupted(&self) -> bool {
        self.error_type == ErrorType::Interrupted
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {:?}", self.error_type, self.inner)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.inner)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.inner)
    }
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::new(ErrorType::Internal, value)
    }
}

/// Converts internal results into the public `Result` type.
pub trait IntoResult<T> {
    /// Tags any error with `error_type`.
    fn pub_result(self, error_type: ErrorType) -> Result<T>;
}

impl<T, E> IntoResult<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn pub_result(self, error_type: ErrorType) -> Result<T> {
        self.map_err(|e| Error::new(error_type, e))
    }
}

/// Errors from chat-completion and embedding providers.
#[derive(Debug, ThisError)]
pub enum ProviderError {
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider request timed out")]
    Timeout,

    #[error("provider request failed: {0}")]
    Network(String),

    #[error("malformed model response: {0}")]
    Malformed(String),

    #[error("invalid classification: {0}")]
    Validation(String),

    #[error("interrupted")]
    Cancelled,

    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<ProviderError>,
    },

    #[error("no acceptable tool call after {iterations} iterations: {source}")]
    IterationsExhausted {
        iterations: usize,
        #[source]
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Server errors (5xx, which covers the 502/503/504 gateway family), rate limiting (429) and
    /// timeouts. Everything else is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            ProviderError::Timeout => true,
            _ => false,
        }
    }

    /// Transient errors plus model output that could not be parsed. Both are worth another
    /// attempt.
    pub fn is_retryable(&self) -> bool {
        self.is_transient() || matches!(self, ProviderError::Malformed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            ProviderError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}
