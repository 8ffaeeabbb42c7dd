//! Cache layer for upstream responses
//!
//! Persists raw upstream payloads per query kind in SQLite and decides,
//! through the freshness policy, whether a stored entry may still be served.

mod freshness;
mod sqlite;
mod store;

pub use freshness::FreshnessPolicy;
pub use sqlite::{CacheConfig, SqliteStore};
pub use store::{CacheEntry, CacheStore, KindStats, Payload, StoreError};
