//! Error types for railproxy
//!
//! One crate-wide error enum covering every failure mode the proxy can hit.
//! The three domain failures (invalid query, upstream, store) stay distinct
//! so callers can map them to the right response.

use crate::cache::StoreError;
use crate::upstream::UpstreamError;
use rail_query::QueryError;
use thiserror::Error;

/// Result type alias for railproxy operations
pub type Result<T> = std::result::Result<T, RailProxyError>;

/// Comprehensive error type for railproxy operations
#[derive(Error, Debug)]
pub enum RailProxyError {
    /// Missing or malformed query parameters
    #[error("{0}")]
    InvalidQuery(#[from] QueryError),

    /// Upstream provider failed or rejected the request
    #[error("{0}")]
    Upstream(#[from] UpstreamError),

    /// Cache persistence failed
    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors (bind, serve)
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client construction errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl RailProxyError {
    /// HTTP status code a caller should see for this error
    ///
    /// 400 for missing parameters, 404 when upstream reported not-found,
    /// 500 for everything else.
    pub fn status_code(&self) -> u16 {
        match self {
            RailProxyError::InvalidQuery(_) => 400,
            RailProxyError::Upstream(e) if e.is_not_found() => 404,
            _ => 500,
        }
    }

    /// Short label used in logs and metrics
    pub fn kind_label(&self) -> &'static str {
        match self {
            RailProxyError::InvalidQuery(_) => "invalid",
            RailProxyError::Upstream(_) => "upstream_error",
            RailProxyError::Store(_) => "store_error",
            _ => "internal",
        }
    }

    /// Whether the message is safe to show to an API caller
    pub fn is_caller_facing(&self) -> bool {
        self.status_code() < 500
    }
}
