//! railproxy - caching proxy for railway queries
//!
//! Answers four kinds of railway query (route search, live running status,
//! PNR booking status, train schedule) from a local SQLite cache when the
//! stored answer is still fresh, and from the upstream provider otherwise.
//!
//! # Architecture
//!
//! - **cache**: Cache store trait, SQLite implementation, freshness policy
//! - **upstream**: HTTP fetcher for the provider, retry with backoff
//! - **query**: Cache-aside orchestrator and single-flight de-duplication
//! - **server**: axum HTTP front end
//! - **config**: YAML configuration with environment overrides
//! - **metrics**: Prometheus counters
//!
//! Query types and cache-key construction live in the `rail-query` crate.

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod query;
pub mod server;
pub mod upstream;

// Re-exports
pub use error::{RailProxyError, Result};
pub use rail_query::{Query, QueryError, QueryKind};
