//! Query cache orchestration
//!
//! One uniform pipeline for every query kind: validate, build the key, try
//! the cache, fall through to upstream on a miss and write the result back.

mod orchestrator;
pub mod single_flight;

pub use orchestrator::{CacheStatus, QueryCache, QueryCacheOptions, QueryOutcome};
