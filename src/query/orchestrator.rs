//! Cache-aside orchestrator shared by all query kinds

use super::single_flight::{Role, SingleFlight};
use crate::cache::{CacheEntry, CacheStore, FreshnessPolicy, KindStats, Payload};
use crate::metrics;
use crate::upstream::{Fetcher, UpstreamError, UpstreamRequest};
use crate::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use rail_query::{Query, QueryKind};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Switches for behavior beyond the plain cache-aside flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryCacheOptions {
    /// Concurrent misses for the same key share one upstream call
    pub single_flight: bool,
    /// Serve an expired entry when upstream fails with anything but not-found
    pub serve_stale_on_error: bool,
    /// Treat a failed cache read as a miss instead of failing the query
    pub fetch_on_store_error: bool,
}

impl Default for QueryCacheOptions {
    fn default() -> Self {
        Self {
            single_flight: true,
            serve_stale_on_error: false,
            fetch_on_store_error: false,
        }
    }
}

/// How a query was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    /// Fresh entry served from the cache
    Hit,
    /// Fetched from upstream
    Miss,
    /// Expired entry served because upstream failed
    Stale,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Stale => "STALE",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    /// Upstream body, verbatim
    pub payload: Payload,
    pub status: CacheStatus,
    /// When the payload was obtained from upstream
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Fetched {
    payload: Payload,
    stored_at: DateTime<Utc>,
}

type FetchResult = std::result::Result<Fetched, UpstreamError>;

/// Single entry point for all four query kinds
///
/// Holds the store and fetcher as injected capabilities; the per-kind
/// differences (parameters, key, window, endpoint) come from `QueryKind`
/// and the freshness policy.
pub struct QueryCache {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    policy: FreshnessPolicy,
    options: QueryCacheOptions,
    flights: SingleFlight<(QueryKind, String), FetchResult>,
}

impl QueryCache {
    pub fn new(store: Arc<dyn CacheStore>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            store,
            fetcher,
            policy: FreshnessPolicy::default(),
            options: QueryCacheOptions::default(),
            flights: SingleFlight::new(),
        }
    }

    pub fn with_policy(mut self, policy: FreshnessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_options(mut self, options: QueryCacheOptions) -> Self {
        self.options = options;
        self
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    pub fn options(&self) -> QueryCacheOptions {
        self.options
    }

    /// Route search between two stations within the next `hours`
    pub async fn search_trains(&self, source: &str, destination: &str, hours: &str) -> Result<QueryOutcome> {
        self.execute(&Query::search(source, destination, hours)).await
    }

    /// Live running status of a train
    pub async fn live_status(&self, train_number: &str, start_day: &str) -> Result<QueryOutcome> {
        self.execute(&Query::live_status(train_number, start_day)).await
    }

    /// Booking status for a PNR
    pub async fn pnr_status(&self, pnr: &str) -> Result<QueryOutcome> {
        self.execute(&Query::pnr_status(pnr)).await
    }

    /// Timetable of a train
    pub async fn train_schedule(&self, train_number: &str) -> Result<QueryOutcome> {
        self.execute(&Query::schedule(train_number)).await
    }

    /// Per-kind entry counts from the store
    pub async fn stats(&self) -> Result<Vec<KindStats>> {
        Ok(self.store.stats().await?)
    }

    /// Close the underlying store
    pub async fn close(&self) -> Result<()> {
        Ok(self.store.close().await?)
    }

    /// Answer a query from the cache or upstream
    pub async fn execute(&self, query: &Query) -> Result<QueryOutcome> {
        let kind = query.kind();
        let result = self.execute_inner(query).await;

        let outcome = match &result {
            Ok(outcome) => match outcome.status {
                CacheStatus::Hit => "hit",
                CacheStatus::Miss => "miss",
                CacheStatus::Stale => "stale",
            },
            Err(e) => e.kind_label(),
        };
        metrics::record_query_outcome(kind, outcome);

        result
    }

    async fn execute_inner(&self, query: &Query) -> Result<QueryOutcome> {
        // Validation happens before any I/O
        let key = query.cache_key()?;
        let request = UpstreamRequest::from_query(query)?;
        let kind = request.kind;

        let cached = match self.store.get(kind, &key).await {
            Ok(entry) => entry,
            Err(e) if self.options.fetch_on_store_error => {
                metrics::record_store_error("read");
                warn!(kind = %kind, key = %key, error = %e, "Cache read failed, fetching from upstream");
                None
            }
            Err(e) => {
                metrics::record_store_error("read");
                return Err(e.into());
            }
        };

        if let Some(entry) = &cached {
            if self.policy.is_fresh(kind, Some(entry), Utc::now()) {
                debug!(kind = %kind, key = %key, "Cache hit");
                return Ok(QueryOutcome {
                    payload: entry.payload.clone(),
                    status: CacheStatus::Hit,
                    stored_at: entry.stored_at,
                });
            }
            debug!(kind = %kind, key = %key, stored_at = %entry.stored_at, "Cache entry stale");
        } else {
            debug!(kind = %kind, key = %key, "Cache miss");
        }

        match self.fetch_and_store(request, key.clone()).await {
            Ok(fetched) => Ok(QueryOutcome {
                payload: fetched.payload,
                status: CacheStatus::Miss,
                stored_at: fetched.stored_at,
            }),
            Err(e) => match cached {
                Some(entry) if self.options.serve_stale_on_error && !e.is_not_found() => {
                    warn!(kind = %kind, key = %key, error = %e, "Upstream failed, serving stale entry");
                    Ok(stale(entry))
                }
                _ => Err(e.into()),
            },
        }
    }

    /// Fetch and write back, optionally sharing the call with concurrent
    /// callers for the same key
    ///
    /// The work runs on its own task so a caller going away does not cancel
    /// the upstream call or the write that follows it.
    async fn fetch_and_store(&self, request: UpstreamRequest, key: String) -> FetchResult {
        let kind = request.kind;
        let store = self.store.clone();
        let fetcher = self.fetcher.clone();
        let task_key = key.clone();

        let start = move || {
            async move {
                tokio::spawn(fetch_then_write(store, fetcher, request, task_key))
                    .await
                    .unwrap_or_else(|e| Err(UpstreamError::other(format!("fetch task failed: {}", e))))
            }
            .boxed()
        };

        if !self.options.single_flight {
            return start().await;
        }

        let (result, role) = self.flights.run((kind, key), start).await;
        if role == Role::Joined {
            metrics::record_single_flight_join(kind);
            debug!(kind = %kind, "Joined in-flight upstream fetch");
        }
        result
    }
}

async fn fetch_then_write(
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    request: UpstreamRequest,
    key: String,
) -> FetchResult {
    let kind = request.kind;
    let payload = fetcher.fetch(&request).await?;

    let stored_at = match store.put(kind, &key, payload.clone()).await {
        Ok(entry) => {
            info!(kind = %kind, key = %key, bytes = payload.len(), "Cached upstream response");
            entry.stored_at
        }
        Err(e) => {
            // Best-effort cache: the caller still gets the fresh payload
            metrics::record_store_error("write");
            warn!(kind = %kind, key = %key, error = %e, "Failed to write cache entry");
            Utc::now()
        }
    };

    Ok(Fetched { payload, stored_at })
}

fn stale(entry: CacheEntry) -> QueryOutcome {
    QueryOutcome {
        payload: entry.payload,
        status: CacheStatus::Stale,
        stored_at: entry.stored_at,
    }
}
