//! Configuration management for Edgegate.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then `EDGEGATE__`-prefixed environment variables (`__` separates nested
//! keys, e.g. `EDGEGATE__UPSTREAM__HOST`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{GatewayError, Result};
use crate::ratelimit::{PolicyTable, StoreErrorPolicy, DEFAULT_KEY_PREFIX, DEFAULT_MOUNT_PREFIX};

/// Main configuration for the Edgegate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream origin configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// CORS preflight configuration
    #[serde(default)]
    pub cors: CorsConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Path prefix under which requests are admission-controlled and proxied
    #[serde(default = "default_mount_prefix")]
    pub mount_prefix: String,

    /// Directory served for paths outside the mount prefix
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            mount_prefix: default_mount_prefix(),
            static_dir: None,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_mount_prefix() -> String {
    DEFAULT_MOUNT_PREFIX.to_string()
}

/// Upstream origin configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Origin host name, optionally with port. No scheme.
    #[serde(default = "default_upstream_host")]
    pub host: String,

    /// Transport scheme. Production deployments keep `https`.
    #[serde(default = "default_upstream_scheme")]
    pub scheme: String,

    /// Total deadline for one upstream exchange, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Connect deadline, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Value of the `X-Proxied-By` marker header
    #[serde(default = "default_proxy_marker")]
    pub proxy_marker: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: default_upstream_host(),
            scheme: default_upstream_scheme(),
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            proxy_marker: default_proxy_marker(),
        }
    }
}

fn default_upstream_host() -> String {
    "localhost:8787".to_string()
}

fn default_upstream_scheme() -> String {
    "https".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_proxy_marker() -> String {
    "edgegate".to_string()
}

/// CORS preflight configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,

    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,

    /// Preflight cache lifetime in seconds
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_methods: default_allowed_methods(),
            allowed_headers: default_allowed_headers(),
            max_age_secs: default_max_age(),
        }
    }
}

fn default_allowed_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_allowed_headers() -> Vec<String> {
    ["Content-Type", "Authorization", "X-API-Key", "CF-Access-Jwt-Assertion"]
        .iter()
        .map(|h| h.to_string())
        .collect()
}

fn default_max_age() -> u64 {
    86400
}

/// Which counter store backs admission control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// No store: every request fails open
    None,
    /// Process-local store
    #[default]
    Memory,
    /// Shared Redis store
    Redis,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    #[serde(default)]
    pub store: StoreBackend,

    /// Required when `store` is `redis`
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix for counter keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Trusted client address headers, consulted in order
    #[serde(default = "default_client_ip_headers")]
    pub client_ip_headers: Vec<String>,

    #[serde(default)]
    pub store_error_policy: StoreErrorPolicy,

    /// Optional YAML file with route rules; replaces `policies` when set
    #[serde(default)]
    pub rules_path: Option<PathBuf>,

    /// Inline route rules
    #[serde(default)]
    pub policies: PolicyTable,

    /// How often the in-memory store drops expired counters, in seconds
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::default(),
            redis_url: None,
            key_prefix: default_key_prefix(),
            client_ip_headers: default_client_ip_headers(),
            store_error_policy: StoreErrorPolicy::default(),
            rules_path: None,
            policies: PolicyTable::default(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_client_ip_headers() -> Vec<String> {
    crate::ratelimit::DEFAULT_CLIENT_HEADERS
        .iter()
        .map(|h| h.to_string())
        .collect()
}

fn default_purge_interval() -> u64 {
    60
}

impl GatewayConfig {
    /// Load configuration from an optional file layered with environment
    /// variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("EDGEGATE")
                .prefix_separator("__")
                .separator("__"),
        );

        let config: GatewayConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        config.resolve()
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatewayConfig =
            serde_yaml::from_str(yaml).map_err(|e| GatewayError::Config(e.to_string()))?;
        config.resolve()
    }

    /// Pull in external rule files, then validate.
    fn resolve(mut self) -> Result<Self> {
        if let Some(path) = &self.rate_limiting.rules_path {
            self.rate_limiting.policies = PolicyTable::from_file(path)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let prefix = &self.server.mount_prefix;
        if !prefix.starts_with('/') || !prefix.ends_with('/') {
            return Err(GatewayError::Config(format!(
                "mount_prefix must start and end with '/': {}",
                prefix
            )));
        }

        if self.upstream.host.trim().is_empty() {
            return Err(GatewayError::Config("upstream.host is required".to_string()));
        }
        if self.upstream.host.contains("://") {
            return Err(GatewayError::Config(
                "upstream.host must not include a scheme".to_string(),
            ));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(GatewayError::Config(
                "upstream.timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.rate_limiting.store == StoreBackend::Redis && self.rate_limiting.redis_url.is_none() {
            return Err(GatewayError::Config(
                "rate_limiting.redis_url is required for the redis store".to_string(),
            ));
        }

        self.rate_limiting.policies.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::QuotaPolicy;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.mount_prefix, "/api/");
        assert_eq!(config.upstream.scheme, "https");
        assert_eq!(config.upstream.timeout_secs, 30);
        assert_eq!(config.cors.max_age_secs, 86400);
        assert_eq!(config.rate_limiting.store, StoreBackend::Memory);
        assert_eq!(config.rate_limiting.key_prefix, "rl");
        assert_eq!(
            config.rate_limiting.client_ip_headers,
            vec!["cf-connecting-ip", "x-forwarded-for"]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  listen_addr: 127.0.0.1:9000
upstream:
  host: api.internal.example
  timeout_secs: 10
rate_limiting:
  store: none
  store_error_policy: allow
  policies:
    rules:
      - class: chat
        exact: [/api/chat]
        policy: { max_requests: 5, window_secs: 30 }
"#;
        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.upstream.host, "api.internal.example");
        assert_eq!(config.upstream.scheme, "https");
        assert_eq!(config.rate_limiting.store, StoreBackend::None);
        assert_eq!(config.rate_limiting.store_error_policy, StoreErrorPolicy::Allow);

        let route = config.rate_limiting.policies.classify("/api/chat").unwrap();
        assert_eq!(route.policy, Some(QuotaPolicy::new(5, 30)));
    }

    #[test]
    fn test_redis_requires_url() {
        let yaml = r#"
rate_limiting:
  store: redis
"#;
        assert!(matches!(
            GatewayConfig::from_yaml(yaml),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_mount_prefix_must_be_slash_delimited() {
        let mut config = GatewayConfig::default();
        config.server.mount_prefix = "/api".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upstream_host_without_scheme() {
        let mut config = GatewayConfig::default();
        config.upstream.host = "https://api.example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let config = GatewayConfig::from_yaml(include_str!("../config/edgegate.example.yaml")).unwrap();
        assert_eq!(config.upstream.host, "api.internal.example");
        assert_eq!(config.rate_limiting.policies, PolicyTable::defaults());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = GatewayConfig::load(None).unwrap();
        assert_eq!(config.server.mount_prefix, "/api/");
    }
}
