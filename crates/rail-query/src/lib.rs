//! Query model for railway lookups
//!
//! Describes the four kinds of railway query a proxy can serve, which
//! parameters each one needs, and how a query is turned into a cache key.
//! Nothing here performs I/O.
//!
//! # Example
//!
//! ```
//! use rail_query::{Query, QueryKind};
//!
//! let query = Query::search("NDLS", "GKP", "8");
//! assert_eq!(query.kind(), QueryKind::RouteSearch);
//! assert_eq!(query.cache_key()?, "NDLS_GKP_8");
//!
//! let pnr = Query::pnr_status("6351738552");
//! assert_eq!(pnr.cache_key()?, "6351738552");
//! # Ok::<(), rail_query::QueryError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator placed between key components
const KEY_SEPARATOR: char = '_';

/// Escape character used inside key components
const KEY_ESCAPE: char = '\\';

/// Errors produced while validating a query
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("{} required for {kind}: missing {}", list_params(.required), .missing.join(", "))]
    MissingParameters {
        kind: QueryKind,
        required: &'static [&'static str],
        missing: Vec<&'static str>,
    },

    #[error("Unknown query kind: {0}")]
    UnknownKind(String),
}

fn list_params(params: &[&str]) -> String {
    match params {
        [] => String::new(),
        [only] => format!("{} is", only),
        [init @ .., last] => format!("{} and {} are", init.join(", "), last),
    }
}

/// Result type for query model operations
pub type Result<T> = std::result::Result<T, QueryError>;

/// The fixed categories of railway query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Trains running between two stations within a time window
    RouteSearch,
    /// Live running position of a train
    LiveStatus,
    /// Booking (PNR) status
    BookingStatus,
    /// Timetable of a train
    Schedule,
}

impl QueryKind {
    /// Every kind, in a stable order
    pub const ALL: [QueryKind; 4] = [
        QueryKind::RouteSearch,
        QueryKind::LiveStatus,
        QueryKind::BookingStatus,
        QueryKind::Schedule,
    ];

    /// Stable snake_case name, also used in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::RouteSearch => "route_search",
            QueryKind::LiveStatus => "live_status",
            QueryKind::BookingStatus => "booking_status",
            QueryKind::Schedule => "schedule",
        }
    }

    /// Parameters that must be present, in cache-key order
    ///
    /// The same names are forwarded to the upstream provider.
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            QueryKind::RouteSearch => &["source", "destination", "hours"],
            QueryKind::LiveStatus => &["trainNumber", "startDay"],
            QueryKind::BookingStatus => &["pnr"],
            QueryKind::Schedule => &["trainNumber"],
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryKind {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "route_search" | "search" | "search_train" => Ok(QueryKind::RouteSearch),
            "live_status" | "live" | "live_train_status" => Ok(QueryKind::LiveStatus),
            "booking_status" | "pnr" | "pnr_status" => Ok(QueryKind::BookingStatus),
            "schedule" | "train_schedule" => Ok(QueryKind::Schedule),
            _ => Err(QueryError::UnknownKind(s.to_string())),
        }
    }
}

/// A railway query: its kind plus named parameters
///
/// Parameters beyond the kind's required set are kept but take no part in
/// the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    kind: QueryKind,
    params: BTreeMap<String, String>,
}

impl Query {
    /// Create an empty query of the given kind
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind,
            params: BTreeMap::new(),
        }
    }

    /// Build a query from raw name/value pairs (e.g. an HTTP query string)
    pub fn from_params<I, K, V>(kind: QueryKind, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            kind,
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Route search between two stations
    pub fn search(
        source: impl Into<String>,
        destination: impl Into<String>,
        hours: impl Into<String>,
    ) -> Self {
        Self::new(QueryKind::RouteSearch)
            .with_param("source", source)
            .with_param("destination", destination)
            .with_param("hours", hours)
    }

    /// Live running status of a train
    pub fn live_status(train_number: impl Into<String>, start_day: impl Into<String>) -> Self {
        Self::new(QueryKind::LiveStatus)
            .with_param("trainNumber", train_number)
            .with_param("startDay", start_day)
    }

    /// Booking status for a PNR
    pub fn pnr_status(pnr: impl Into<String>) -> Self {
        Self::new(QueryKind::BookingStatus).with_param("pnr", pnr)
    }

    /// Schedule of a train
    pub fn schedule(train_number: impl Into<String>) -> Self {
        Self::new(QueryKind::Schedule).with_param("trainNumber", train_number)
    }

    /// Set a parameter, replacing any previous value
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Value of a parameter, treating blank values as absent
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Required parameters that are absent or blank
    pub fn missing_params(&self) -> Vec<&'static str> {
        self.kind
            .required_params()
            .iter()
            .copied()
            .filter(|name| self.param(name).is_none())
            .collect()
    }

    /// Check that every required parameter is present
    pub fn validate(&self) -> Result<()> {
        let missing = self.missing_params();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(QueryError::MissingParameters {
                kind: self.kind,
                required: self.kind.required_params(),
                missing,
            })
        }
    }

    /// Required parameters as (name, value) pairs in declared order
    ///
    /// These are the parameters forwarded upstream.
    pub fn required_pairs(&self) -> Result<Vec<(&'static str, &str)>> {
        self.validate()?;
        Ok(self
            .kind
            .required_params()
            .iter()
            .filter_map(|name| self.param(name).map(|value| (*name, value)))
            .collect())
    }

    /// Deterministic cache key for this query
    ///
    /// Components are joined with `_` in the kind's declared order. Any `_`
    /// or `\` inside a component is escaped so distinct parameter tuples
    /// never share a key.
    pub fn cache_key(&self) -> Result<String> {
        let pairs = self.required_pairs()?;
        let mut key = String::new();
        for (i, (_, value)) in pairs.iter().enumerate() {
            if i > 0 {
                key.push(KEY_SEPARATOR);
            }
            push_escaped(&mut key, value);
        }
        Ok(key)
    }
}

fn push_escaped(key: &mut String, component: &str) {
    for c in component.chars() {
        if c == KEY_SEPARATOR || c == KEY_ESCAPE {
            key.push(KEY_ESCAPE);
        }
        key.push(c);
    }
}
