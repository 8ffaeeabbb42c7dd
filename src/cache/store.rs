//! Cache store abstraction and entry types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rail_query::QueryKind;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a cache store
///
/// Distinct from "not found": a missing entry is `Ok(None)`, never an error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("cache store is closed")]
    Closed,

    #[error("store task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw upstream response body, kept as serialized JSON text
///
/// The cache never interprets the payload beyond checking that it is JSON.
/// Cloning is cheap so one fetched payload can be handed to several callers.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload(Arc<str>);

impl Payload {
    /// Wrap JSON text, rejecting anything that does not parse
    pub fn from_json_text(text: impl Into<String>) -> std::result::Result<Self, serde_json::Error> {
        let text = text.into();
        serde_json::from_str::<serde::de::IgnoredAny>(&text)?;
        Ok(Self(Arc::from(text)))
    }

    /// Serialize a JSON value into a payload
    pub fn from_value(value: &serde_json::Value) -> Self {
        Self(Arc::from(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the payload into a JSON value
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&self.len()).finish()
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored upstream response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub kind: QueryKind,
    pub key: String,
    pub payload: Payload,
    pub stored_at: DateTime<Utc>,
}

/// Per-kind cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindStats {
    pub kind: QueryKind,
    pub entries: u64,
    pub newest: Option<DateTime<Utc>>,
}

/// Durable key/value storage for upstream responses, scoped per query kind
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Point lookup; `Ok(None)` when no entry exists for the key
    async fn get(&self, kind: QueryKind, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or fully replace the entry for `key`, stamping it with the
    /// current time
    async fn put(
        &self,
        kind: QueryKind,
        key: &str,
        payload: Payload,
    ) -> Result<CacheEntry, StoreError>;

    /// Entry counts and newest timestamps per kind
    async fn stats(&self) -> Result<Vec<KindStats>, StoreError>;

    /// Release the underlying resources; later calls fail with `Closed`
    async fn close(&self) -> Result<(), StoreError>;
}
