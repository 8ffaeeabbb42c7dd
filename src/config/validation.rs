//! Configuration validation
//!
//! Validates railproxy configuration before anything talks to the network:
//! - Upstream credentials are present
//! - Base URL is http(s)
//! - Timeouts and freshness windows are non-zero
//! - Bind address parses

use super::proxy_config::{RailProxyConfig, API_HOST_ENV, API_KEY_ENV};
use crate::RailProxyError;
use rail_query::QueryKind;
use std::net::SocketAddr;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub context: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref ctx) = self.context {
            write!(f, "[{}] {}: {}", ctx, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a railproxy configuration
pub fn validate_config(config: &RailProxyConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.server.bind.parse::<SocketAddr>().is_err() {
        errors.push(
            ValidationError::new(
                "bind",
                format!("Invalid bind address: {}", config.server.bind),
            )
            .with_context("server"),
        );
    }

    if let Some(ref origin) = config.server.frontend_origin {
        if !is_valid_origin(origin) {
            errors.push(
                ValidationError::new(
                    "frontend_origin",
                    format!("Invalid frontend origin: {}", origin),
                )
                .with_context("server"),
            );
        }
    }

    if let Err(mut upstream_errors) = validate_upstream(config) {
        errors.append(&mut upstream_errors);
    }

    for kind in QueryKind::ALL {
        if config.freshness.seconds(kind) == 0 {
            errors.push(
                ValidationError::new(kind.as_str(), "Freshness window must be greater than 0")
                    .with_context("freshness"),
            );
        }
    }

    if config.cache.path.as_os_str().is_empty() {
        errors.push(ValidationError::new("path", "Cache path cannot be empty").with_context("cache"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the upstream section
fn validate_upstream(config: &RailProxyConfig) -> ValidationResult {
    let upstream = &config.upstream;
    let mut errors = Vec::new();

    if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://") {
        errors.push(
            ValidationError::new(
                "base_url",
                format!("Invalid upstream URL: {}", upstream.base_url),
            )
            .with_context("upstream"),
        );
    }

    if is_blank(upstream.api_key.as_deref()) {
        errors.push(
            ValidationError::new(
                "api_key",
                format!("API key is required (set {} or upstream.api_key)", API_KEY_ENV),
            )
            .with_context("upstream"),
        );
    }

    if is_blank(upstream.api_host.as_deref()) {
        errors.push(
            ValidationError::new(
                "api_host",
                format!("API host is required (set {} or upstream.api_host)", API_HOST_ENV),
            )
            .with_context("upstream"),
        );
    }

    if upstream.timeout_secs == 0 {
        errors.push(
            ValidationError::new("timeout_secs", "Timeout must be greater than 0")
                .with_context("upstream"),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

/// Check that an origin is an http(s) scheme plus host, usable as a header
fn is_valid_origin(origin: &str) -> bool {
    let rest = origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"));
    match rest {
        Some(host) => {
            !host.is_empty()
                && !host.contains('/')
                && !host.chars().any(|c| c.is_whitespace() || c.is_control())
        }
        None => false,
    }
}

/// Validate configuration and return a Result
pub fn validate_config_result(config: &RailProxyConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        RailProxyError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
