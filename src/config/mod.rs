//! Gateway configuration.
//!
//! All settings come from environment variables with the `STREAMGATE_`
//! prefix, with sensible defaults for local development. The CLI layer
//! (see `main.rs`) can override the listen addresses.

use crate::error::GateError;

/// Default maximum request body size (1MB).
const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Default maximum concurrent in-flight requests.
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 10000;

/// Configuration for the gateway.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Listen address for the session endpoint (e.g., "127.0.0.1:8080")
    pub listen_addr: String,
    /// Listen address for the admin endpoints (health, metrics)
    pub admin_addr: String,
    /// Allowed Origin header values. `["*"]` disables the check.
    pub allowed_origins: Vec<String>,
    /// Allowed Host header values. `["*"]` disables the check.
    pub allowed_hosts: Vec<String>,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Maximum concurrent requests
    pub max_concurrent_requests: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            admin_addr: "127.0.0.1:9090".to_string(),
            allowed_origins: vec!["*".to_string()],
            allowed_hosts: vec!["*".to_string()],
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

impl GateConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `STREAMGATE_LISTEN` (default: "127.0.0.1:8080"): Session endpoint address
    /// - `STREAMGATE_ADMIN_LISTEN` (default: "127.0.0.1:9090"): Admin endpoint address
    /// - `STREAMGATE_ALLOWED_ORIGINS` (default: "*"): Comma-separated Origin allow-list
    /// - `STREAMGATE_ALLOWED_HOSTS` (default: "*"): Comma-separated Host allow-list
    /// - `STREAMGATE_MAX_REQUEST_BODY_BYTES` (default: 1048576): Max body size
    /// - `STREAMGATE_MAX_CONCURRENT_REQUESTS` (default: 10000): Max concurrent requests
    ///
    /// # Errors
    ///
    /// Returns `GateError::InvalidParams` if an allow-list is set but empty
    /// after parsing, which would reject every request.
    pub fn from_env() -> Result<Self, GateError> {
        let listen_addr =
            std::env::var("STREAMGATE_LISTEN").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        let admin_addr = std::env::var("STREAMGATE_ADMIN_LISTEN")
            .unwrap_or_else(|_| "127.0.0.1:9090".to_string());

        let allowed_origins = parse_list_var("STREAMGATE_ALLOWED_ORIGINS")?;
        let allowed_hosts = parse_list_var("STREAMGATE_ALLOWED_HOSTS")?;

        let max_body_size: usize = std::env::var("STREAMGATE_MAX_REQUEST_BODY_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_BODY_SIZE);

        let max_concurrent_requests: usize = std::env::var("STREAMGATE_MAX_CONCURRENT_REQUESTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS);

        Ok(Self {
            listen_addr,
            admin_addr,
            allowed_origins,
            allowed_hosts,
            max_body_size,
            max_concurrent_requests,
        })
    }
}

/// Parse a comma-separated allow-list variable. Unset means wildcard.
fn parse_list_var(name: &str) -> Result<Vec<String>, GateError> {
    match std::env::var(name) {
        Err(_) => Ok(vec!["*".to_string()]),
        Ok(raw) => {
            let entries: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if entries.is_empty() {
                return Err(GateError::InvalidParams {
                    details: format!("{} is set but contains no entries", name),
                });
            }
            Ok(entries)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        // SAFETY: Tests in this module run serially; env mutation is isolated
        unsafe {
            std::env::remove_var("STREAMGATE_LISTEN");
            std::env::remove_var("STREAMGATE_ADMIN_LISTEN");
            std::env::remove_var("STREAMGATE_ALLOWED_ORIGINS");
            std::env::remove_var("STREAMGATE_ALLOWED_HOSTS");
            std::env::remove_var("STREAMGATE_MAX_REQUEST_BODY_BYTES");
            std::env::remove_var("STREAMGATE_MAX_CONCURRENT_REQUESTS");
        }
    }

    #[test]
    fn test_default_config() {
        let config = GateConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.admin_addr, "127.0.0.1:9090");
        assert_eq!(config.allowed_origins, vec!["*"]);
        assert_eq!(config.allowed_hosts, vec!["*"]);
        assert_eq!(config.max_body_size, 1024 * 1024);
        assert_eq!(config.max_concurrent_requests, 10000);
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();

        let config = GateConfig::from_env().expect("should load defaults");
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.allowed_origins, vec!["*"]);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        // SAFETY: Serial test, env mutation is isolated
        unsafe {
            std::env::set_var("STREAMGATE_LISTEN", "0.0.0.0:3000");
            std::env::set_var(
                "STREAMGATE_ALLOWED_ORIGINS",
                "http://localhost:3000, https://app.example.com",
            );
            std::env::set_var("STREAMGATE_MAX_REQUEST_BODY_BYTES", "4194304");
        }

        let config = GateConfig::from_env().expect("should load overrides");
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
        assert_eq!(
            config.allowed_origins,
            vec!["http://localhost:3000", "https://app.example.com"]
        );
        assert_eq!(config.max_body_size, 4 * 1024 * 1024);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_empty_allowlist_rejected() {
        clear_env();
        // SAFETY: Serial test, env mutation is isolated
        unsafe {
            std::env::set_var("STREAMGATE_ALLOWED_ORIGINS", " , ");
        }

        let result = GateConfig::from_env();
        assert!(matches!(result, Err(GateError::InvalidParams { .. })));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_unparsable_numeric_falls_back() {
        clear_env();
        // SAFETY: Serial test, env mutation is isolated
        unsafe {
            std::env::set_var("STREAMGATE_MAX_CONCURRENT_REQUESTS", "not-a-number");
        }

        let config = GateConfig::from_env().expect("should load");
        assert_eq!(config.max_concurrent_requests, 10000);

        clear_env();
    }
}
