use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop a whole run.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("invalid target URL '{url}': {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("failed to fetch entry page {url}: {reason}")]
    EntryPage { url: String, reason: FetchFailure },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A reference that must not be fetched: empty, fragment-only, `data:`,
/// `mailto:`, `javascript:` and other non-HTTP values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unresolvable reference '{raw}'")]
pub struct UnresolvableReference {
    pub raw: String,
}

/// Failure of the HTTP transport itself, before any status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("timeout")]
    Timeout,
    #[error("connection error: {0}")]
    Connect(String),
    #[error("redirect error: {0}")]
    Redirect(String),
    #[error("body error: {0}")]
    Body(String),
    #[error("request error: {0}")]
    Other(String),
}

/// Why a single resource ended up in the report's failure list.
///
/// `Display` is the reason string recorded in the report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    #[error("{0}")]
    Status(u16),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("write error: {0}")]
    Write(String),
    #[error("cancelled")]
    Cancelled,
}
