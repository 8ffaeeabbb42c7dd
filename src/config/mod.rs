//! Configuration system
//!
//! Loads ~/.config/railproxy/config.yaml with support for:
//! - Server bind address and CORS frontend origin
//! - Upstream provider URL, credentials, timeout and retry
//! - Cache database location
//! - Per-kind freshness windows
//! - Resilience switches (single-flight, stale fallback)
//!
//! `RAPID_API_KEY`, `RAPID_API_HOST`, `PORT` and `FRONTEND_URI` override the file.

mod proxy_config;
pub mod validation;

pub use proxy_config::{
    FreshnessConfig, RailProxyConfig, ResilienceConfig, ServerConfig, UpstreamConfig,
    API_HOST_ENV, API_KEY_ENV, FRONTEND_URI_ENV, PORT_ENV,
};
pub use validation::{validate_config, validate_config_result, ValidationError};
