//! Upstream railway data provider
//!
//! One GET per query kind against the provider, with credentials attached
//! from configuration, a bounded timeout and a single retry for transient
//! network failures.
//!
//! # Endpoints
//!
//! | Kind | Path |
//! |---|---|
//! | route search | `/liveStation` |
//! | live status | `/liveTrain` |
//! | booking status | `/pnrStatus` |
//! | schedule | `/trainSchedule` |

mod client;
mod endpoint;
pub mod retry;

pub use client::UpstreamClient;
pub use endpoint::{endpoint_path, UpstreamRequest};

use crate::cache::Payload;
use async_trait::async_trait;
use std::fmt;

/// Failure talking to the upstream provider
///
/// Cloneable so a single failed fetch can be reported to every caller that
/// was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    status: Option<u16>,
    message: String,
    transient: bool,
}

impl UpstreamError {
    /// Upstream reported that the requested entity does not exist
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_status(404, message)
    }

    /// Upstream answered with a non-success status
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            transient: false,
        }
    }

    /// Connection-level failure (refused, reset, timed out)
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            transient: true,
        }
    }

    /// Failure that produced no status and is not worth retrying
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            transient: false,
        }
    }

    /// Classify a reqwest error
    ///
    /// Only failures on the wire are transient: connecting, timing out, or
    /// the response body breaking off mid-stream. Builder and URL errors
    /// would fail the same way on every attempt.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::with_status(status.as_u16(), err.to_string());
        }
        if err.is_timeout() {
            Self::network(format!("request timed out: {}", err))
        } else if err.is_connect() || err.is_body() || err.is_decode() {
            Self::network(err.to_string())
        } else {
            Self::other(err.to_string())
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    /// Network-class failure or gateway status
    pub fn is_transient(&self) -> bool {
        self.transient || matches!(self.status, Some(502..=504))
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(404) => f.write_str(&self.message),
            Some(status) => write!(f, "Upstream returned {}: {}", status, self.message),
            None => write!(f, "Upstream request failed: {}", self.message),
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Performs the outbound call for a query
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the raw response body for a validated request
    async fn fetch(&self, request: &UpstreamRequest) -> Result<Payload, UpstreamError>;
}
