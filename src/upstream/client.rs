//! HTTP client for the upstream provider

use super::endpoint::UpstreamRequest;
use super::retry::RetryPolicy;
use super::{Fetcher, UpstreamError};
use crate::cache::Payload;
use crate::config::UpstreamConfig;
use crate::{metrics, RailProxyError, Result};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::time::Instant;
use tracing::{debug, warn};

/// reqwest-backed fetcher with provider credentials attached to every call
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl UpstreamClient {
    /// Create a new upstream client
    ///
    /// Returns a configuration error if the API key or host is missing or
    /// cannot be used as a header value.
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let api_key = required(config.api_key.as_deref(), "upstream.api_key")?;
        let api_host = required(config.api_host.as_deref(), "upstream.api_host")?;

        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers({
                let mut headers = header::HeaderMap::new();
                let mut key = header_value(api_key, "upstream.api_key")?;
                key.set_sensitive(true);
                headers.insert("x-rapidapi-key", key);
                headers.insert("x-rapidapi-host", header_value(api_host, "upstream.api_host")?);
                headers.insert(
                    header::USER_AGENT,
                    header::HeaderValue::from_static(concat!("railproxy/", env!("CARGO_PKG_VERSION"))),
                );
                headers
            })
            .build()?; // reqwest::Error converts to RailProxyError::Http via #[from]

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: config.retry_policy(),
        })
    }

    /// Replace the retry behavior
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One attempt, no retries
    async fn fetch_once(&self, request: &UpstreamRequest) -> std::result::Result<Payload, UpstreamError> {
        let url = format!("{}{}", self.base_url, request.path());

        debug!(kind = %request.kind, url = %url, "Fetching from upstream");

        let response = self
            .client
            .get(&url)
            .query(&request.params)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest(&e))?;

        if !status.is_success() {
            return Err(UpstreamError::with_status(
                status.as_u16(),
                error_message(&body, status),
            ));
        }

        interpret_body(body)
    }
}

#[async_trait]
impl Fetcher for UpstreamClient {
    async fn fetch(&self, request: &UpstreamRequest) -> std::result::Result<Payload, UpstreamError> {
        let started = Instant::now();
        let result = self.retry.run(request.kind, || self.fetch_once(request)).await;

        let label = match &result {
            Ok(_) => "ok",
            Err(e) if e.is_not_found() => "not_found",
            Err(e) => {
                warn!(kind = %request.kind, error = %e, "Upstream fetch failed");
                "error"
            }
        };
        metrics::record_upstream_request(request.kind, label, started.elapsed().as_secs_f64());

        result
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RailProxyError::Config(format!("{} is required", field)))
}

fn header_value(value: &str, field: &str) -> Result<header::HeaderValue> {
    header::HeaderValue::from_str(value)
        .map_err(|_| RailProxyError::Config(format!("{} is not a valid header value", field)))
}

/// Turn a 2xx body into a payload
///
/// The provider reports missing entities (flushed PNRs, unknown trains) as
/// a 2xx body with `"success": false`. Those become not-found errors so they
/// are never cached.
fn interpret_body(body: String) -> std::result::Result<Payload, UpstreamError> {
    let value: serde_json::Value = serde_json::from_str(&body).map_err(invalid_json)?;

    if value.get("success").and_then(serde_json::Value::as_bool) == Some(false) {
        return Err(UpstreamError::not_found(
            body_message(&value).unwrap_or_else(|| "Not found".to_string()),
        ));
    }

    // Keep the body as sent; `value` is only for the success check
    Payload::from_json_text(body).map_err(invalid_json)
}

fn invalid_json(e: serde_json::Error) -> UpstreamError {
    UpstreamError::with_status(
        StatusCode::BAD_GATEWAY.as_u16(),
        format!("Upstream returned invalid JSON: {}", e),
    )
}

/// Best-effort error text from an error body
fn error_message(body: &str, status: StatusCode) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| body_message(&v))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown status")
                .to_string()
        })
}

fn body_message(value: &serde_json::Value) -> Option<String> {
    ["error", "message"]
        .iter()
        .find_map(|field| value.get(*field).and_then(serde_json::Value::as_str))
        .map(str::to_string)
}
