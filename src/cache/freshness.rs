//! Freshness policy: per-kind expiration windows

use super::store::CacheEntry;
use chrono::{DateTime, Utc};
use rail_query::QueryKind;
use std::time::Duration;

/// Maximum age per query kind before a cached entry is treated as stale
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessPolicy {
    route_search: Duration,
    live_status: Duration,
    booking_status: Duration,
    schedule: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            route_search: Duration::from_secs(60 * 60),
            live_status: Duration::from_secs(60),
            booking_status: Duration::from_secs(60 * 60),
            schedule: Duration::from_secs(60 * 60),
        }
    }
}

impl FreshnessPolicy {
    /// Expiration window for a kind
    pub fn window(&self, kind: QueryKind) -> Duration {
        match kind {
            QueryKind::RouteSearch => self.route_search,
            QueryKind::LiveStatus => self.live_status,
            QueryKind::BookingStatus => self.booking_status,
            QueryKind::Schedule => self.schedule,
        }
    }

    /// Replace the window for one kind
    pub fn with_window(mut self, kind: QueryKind, window: Duration) -> Self {
        let slot = match kind {
            QueryKind::RouteSearch => &mut self.route_search,
            QueryKind::LiveStatus => &mut self.live_status,
            QueryKind::BookingStatus => &mut self.booking_status,
            QueryKind::Schedule => &mut self.schedule,
        };
        *slot = window;
        self
    }

    /// Whether `entry` may be served at `now`
    ///
    /// An absent entry is never fresh. A present one is fresh while its age
    /// is strictly below the kind's window; entries stamped in the future
    /// count as age zero.
    pub fn is_fresh(&self, kind: QueryKind, entry: Option<&CacheEntry>, now: DateTime<Utc>) -> bool {
        match entry {
            Some(entry) => self.is_fresh_at(kind, entry.stored_at, now),
            None => false,
        }
    }

    /// Freshness check on a bare timestamp
    pub fn is_fresh_at(&self, kind: QueryKind, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(stored_at);
        match chrono::Duration::from_std(self.window(kind)) {
            Ok(window) => age < window,
            // Window too large to represent: nothing ever expires
            Err(_) => true,
        }
    }
}
