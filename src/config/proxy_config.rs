//! railproxy configuration file handling
//!
//! Loads and manages the ~/.config/railproxy/config.yaml file.

use crate::cache::{CacheConfig, FreshnessPolicy};
use crate::query::QueryCacheOptions;
use crate::upstream::retry::RetryPolicy;
use crate::Result;
use rail_query::QueryKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the provider API key
pub const API_KEY_ENV: &str = "RAPID_API_KEY";
/// Environment variable holding the provider host identifier
pub const API_HOST_ENV: &str = "RAPID_API_HOST";
/// Environment variable overriding the listening port
pub const PORT_ENV: &str = "PORT";
/// Environment variable naming the frontend origin allowed through CORS
pub const FRONTEND_URI_ENV: &str = "FRONTEND_URI";

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Browser origin allowed to call the API with credentials; any origin
    /// may call it without credentials when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_origin: Option<String>,
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            frontend_origin: None,
        }
    }
}

/// Upstream provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Provider base URL, without trailing path
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key sent as `x-rapidapi-key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Host identifier sent as `x-rapidapi-host`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_host: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_base_url() -> String {
    "https://irctc-api2.p.rapidapi.com".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    250
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            api_host: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Freshness windows in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessConfig {
    #[serde(default = "default_hour")]
    pub route_search: u64,

    #[serde(default = "default_minute")]
    pub live_status: u64,

    #[serde(default = "default_hour")]
    pub booking_status: u64,

    #[serde(default = "default_hour")]
    pub schedule: u64,
}

fn default_hour() -> u64 {
    60 * 60
}

fn default_minute() -> u64 {
    60
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            route_search: default_hour(),
            live_status: default_minute(),
            booking_status: default_hour(),
            schedule: default_hour(),
        }
    }
}

impl FreshnessConfig {
    pub fn seconds(&self, kind: QueryKind) -> u64 {
        match kind {
            QueryKind::RouteSearch => self.route_search,
            QueryKind::LiveStatus => self.live_status,
            QueryKind::BookingStatus => self.booking_status,
            QueryKind::Schedule => self.schedule,
        }
    }

    /// Build the policy used by the orchestrator
    pub fn policy(&self) -> FreshnessPolicy {
        QueryKind::ALL
            .into_iter()
            .fold(FreshnessPolicy::default(), |policy, kind| {
                policy.with_window(kind, Duration::from_secs(self.seconds(kind)))
            })
    }
}

/// Behavior when parts of the pipeline fail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Share one in-flight upstream call between concurrent identical misses
    #[serde(default = "default_true")]
    pub single_flight: bool,

    /// Serve an expired entry when the upstream call fails
    #[serde(default)]
    pub serve_stale_on_error: bool,

    /// Treat a failed cache read as a miss instead of failing the request
    #[serde(default)]
    pub fetch_on_store_error: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            single_flight: true,
            serve_stale_on_error: false,
            fetch_on_store_error: false,
        }
    }
}

impl ResilienceConfig {
    pub fn options(&self) -> QueryCacheOptions {
        QueryCacheOptions {
            single_flight: self.single_flight,
            serve_stale_on_error: self.serve_stale_on_error,
            fetch_on_store_error: self.fetch_on_store_error,
        }
    }
}

/// railproxy configuration
///
/// Represents the complete ~/.config/railproxy/config.yaml file. Every
/// section is optional; missing values take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RailProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub freshness: FreshnessConfig,

    #[serde(default)]
    pub resilience: ResilienceConfig,
}

impl RailProxyConfig {
    /// Create a configuration with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the default path, falling back to defaults
    /// when no file exists
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            tracing::debug!(path = %path.display(), "No configuration file, using defaults");
            Ok(Self::new())
        }
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::RailProxyError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading railproxy configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            bind = %config.server.bind,
            base_url = %config.upstream.base_url,
            cache = %config.cache.path.display(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving railproxy configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/railproxy/config.yaml)
    pub fn default_path() -> PathBuf {
        // Always use ~/.config for consistency across platforms (macOS, Linux)
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("railproxy");
        path.push("config.yaml");
        path
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    ///
    /// `RAPID_API_KEY` and `RAPID_API_HOST` replace the credentials, `PORT`
    /// replaces the port of the bind address and `FRONTEND_URI` the CORS
    /// origin. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup(API_KEY_ENV) {
            self.upstream.api_key = Some(key);
        }
        if let Some(host) = lookup(API_HOST_ENV) {
            self.upstream.api_host = Some(host);
        }
        if let Some(port) = lookup(PORT_ENV) {
            let host = self
                .server
                .bind
                .rsplit_once(':')
                .map(|(host, _)| host)
                .unwrap_or("0.0.0.0");
            self.server.bind = format!("{}:{}", host, port.trim());
        }
        if let Some(origin) = lookup(FRONTEND_URI_ENV) {
            self.server.frontend_origin = Some(origin.trim().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_defaults() {
        let config = RailProxyConfig::new();
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert_eq!(config.upstream.base_url, "https://irctc-api2.p.rapidapi.com");
        assert_eq!(config.upstream.timeout_secs, 10);
        assert_eq!(config.upstream.max_retries, 1);
        assert!(config.upstream.api_key.is_none());
        assert!(config.resilience.single_flight);
        assert!(!config.resilience.serve_stale_on_error);
        assert!(!config.resilience.fetch_on_store_error);
    }

    #[test]
    fn test_default_freshness_matches_policy() {
        let config = RailProxyConfig::new();
        assert_eq!(config.freshness.policy(), FreshnessPolicy::default());
    }

    #[test]
    fn test_freshness_overrides() {
        let yaml = "freshness:\n  live_status: 30\n";
        let config: RailProxyConfig = serde_yaml::from_str(yaml).unwrap();
        let policy = config.freshness.policy();
        assert_eq!(policy.window(QueryKind::LiveStatus), Duration::from_secs(30));
        assert_eq!(policy.window(QueryKind::RouteSearch), Duration::from_secs(3600));
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config: RailProxyConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert_eq!(config.freshness.live_status, 60);
    }

    #[test]
    fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let mut config = RailProxyConfig::new();
        config.upstream.api_host = Some("irctc-api2.p.rapidapi.com".to_string());
        config.freshness.schedule = 7200;
        config.save(path).unwrap();

        let loaded = RailProxyConfig::load(path).unwrap();
        assert_eq!(loaded.upstream.api_host.as_deref(), Some("irctc-api2.p.rapidapi.com"));
        assert_eq!(loaded.freshness.schedule, 7200);
    }

    #[test]
    fn test_load_missing_file() {
        let result = RailProxyConfig::load("/nonexistent/railproxy.yaml");
        assert!(matches!(result, Err(crate::RailProxyError::Config(_))));
    }

    #[test]
    fn test_default_path() {
        let path = RailProxyConfig::default_path();
        assert!(path.ends_with("railproxy/config.yaml"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RAPID_API_KEY", "secret"),
            ("RAPID_API_HOST", "irctc-api2.p.rapidapi.com"),
            ("PORT", "9090"),
            ("FRONTEND_URI", "http://localhost:5173"),
        ]
        .into_iter()
        .collect();

        let mut config = RailProxyConfig::new();
        config.apply_env_from(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.upstream.api_key.as_deref(), Some("secret"));
        assert_eq!(config.upstream.api_host.as_deref(), Some("irctc-api2.p.rapidapi.com"));
        assert_eq!(config.server.bind, "127.0.0.1:9090");
        assert_eq!(config.server.frontend_origin.as_deref(), Some("http://localhost:5173"));
    }

    #[test]
    fn test_frontend_origin_from_file() {
        let yaml = "server:\n  frontend_origin: https://trains.example.com\n";
        let config: RailProxyConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.frontend_origin.as_deref(), Some("https://trains.example.com"));
        assert_eq!(config.server.bind, "127.0.0.1:8000");

        let yaml = serde_yaml::to_string(&RailProxyConfig::new()).unwrap();
        assert!(!yaml.contains("frontend_origin"));
    }

    #[test]
    fn test_blank_env_is_ignored() {
        let mut config = RailProxyConfig::new();
        config.upstream.api_key = Some("from-file".to_string());
        config.apply_env_from(|name| (name == API_KEY_ENV).then(|| "  ".to_string()));
        assert_eq!(config.upstream.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_api_key_not_serialized_when_absent() {
        let yaml = serde_yaml::to_string(&RailProxyConfig::new()).unwrap();
        assert!(!yaml.contains("api_key"));
        assert!(yaml.contains("freshness:"));
        assert!(yaml.contains("resilience:"));
    }

    #[test]
    fn test_retry_policy_from_upstream() {
        let mut upstream = UpstreamConfig::default();
        upstream.max_retries = 0;
        upstream.retry_backoff_ms = 10;
        let retry = upstream.retry_policy();
        assert_eq!(retry.max_retries, 0);
        assert_eq!(retry.backoff, Duration::from_millis(10));
        assert_eq!(UpstreamConfig::default().retry_policy(), RetryPolicy::default());
    }
}
