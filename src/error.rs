//! Crate-wide error type.
//!
//! Components that must never fail outward (testers, filter batches, trend
//! analysis, per-source collection) convert these into logged outcomes at
//! their boundary. Everything below that boundary propagates with `?`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Prompt template not found: {0}")]
    PromptNotFound(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Invariant(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// True for unique-constraint violations, which callers treat as a skip.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::Duplicate(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
