//! Origin and Host allow-lists.
//!
//! Browsers can be tricked into sending requests to a local gateway via DNS
//! rebinding: the attacker's page resolves to 127.0.0.1 after the origin
//! check, so the request arrives with a foreign `Origin` or `Host` header.
//! Validating both headers against configured allow-lists closes that hole.
//! The guard runs before any registry access; a rejected request can neither
//! create nor observe a session.
//!
//! `"*"` in a list disables that list's check, which is the default so local
//! development works out of the box.

use axum::http::{HeaderMap, header};

use crate::error::GateError;

/// Header allow-list guard, built once from config and shared.
#[derive(Debug, Clone)]
pub struct AllowListGuard {
    allowed_origins: Vec<String>,
    allowed_hosts: Vec<String>,
    origins_wildcard: bool,
    hosts_wildcard: bool,
}

impl AllowListGuard {
    /// Build the guard from configured allow-lists.
    pub fn new(allowed_origins: Vec<String>, allowed_hosts: Vec<String>) -> Self {
        let origins_wildcard = allowed_origins.iter().any(|o| o == "*");
        let hosts_wildcard = allowed_hosts.iter().any(|h| h == "*");
        Self {
            allowed_origins,
            allowed_hosts,
            origins_wildcard,
            hosts_wildcard,
        }
    }

    /// Check a request's `Origin` and `Host` headers.
    ///
    /// An absent `Origin` passes: non-browser clients do not send one, and
    /// rebinding attacks always carry a foreign origin. `Host` comparison is
    /// exact (including port) and case-insensitive.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), GateError> {
        if !self.origins_wildcard {
            if let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
                let allowed = self
                    .allowed_origins
                    .iter()
                    .any(|o| o.eq_ignore_ascii_case(origin));
                if !allowed {
                    return Err(GateError::ForbiddenOrigin {
                        origin: origin.to_string(),
                    });
                }
            }
        }

        if !self.hosts_wildcard {
            let host = headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            let allowed = self.allowed_hosts.iter().any(|h| h.eq_ignore_ascii_case(host));
            if !allowed {
                return Err(GateError::ForbiddenHost {
                    host: host.to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(origin: Option<&str>, host: Option<&str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(o) = origin {
            map.insert(header::ORIGIN, HeaderValue::from_str(o).expect("valid"));
        }
        if let Some(h) = host {
            map.insert(header::HOST, HeaderValue::from_str(h).expect("valid"));
        }
        map
    }

    #[test]
    fn test_wildcard_allows_everything() {
        let guard = AllowListGuard::new(vec!["*".to_string()], vec!["*".to_string()]);
        assert!(
            guard
                .check(&headers(Some("http://evil.example"), Some("evil.example")))
                .is_ok()
        );
        assert!(guard.check(&headers(None, None)).is_ok());
    }

    #[test]
    fn test_origin_allowed() {
        let guard = AllowListGuard::new(
            vec!["http://localhost:3000".to_string()],
            vec!["*".to_string()],
        );
        assert!(
            guard
                .check(&headers(Some("http://localhost:3000"), None))
                .is_ok()
        );
    }

    #[test]
    fn test_origin_rejected() {
        let guard = AllowListGuard::new(
            vec!["http://localhost:3000".to_string()],
            vec!["*".to_string()],
        );
        let result = guard.check(&headers(Some("http://evil.example"), None));
        assert!(matches!(result, Err(GateError::ForbiddenOrigin { .. })));
    }

    #[test]
    fn test_absent_origin_allowed() {
        // Non-browser clients send no Origin header.
        let guard = AllowListGuard::new(
            vec!["http://localhost:3000".to_string()],
            vec!["*".to_string()],
        );
        assert!(guard.check(&headers(None, None)).is_ok());
    }

    #[test]
    fn test_origin_case_insensitive() {
        let guard = AllowListGuard::new(
            vec!["http://LocalHost:3000".to_string()],
            vec!["*".to_string()],
        );
        assert!(
            guard
                .check(&headers(Some("http://localhost:3000"), None))
                .is_ok()
        );
    }

    #[test]
    fn test_host_allowed_and_rejected() {
        let guard = AllowListGuard::new(
            vec!["*".to_string()],
            vec!["localhost:8080".to_string(), "127.0.0.1:8080".to_string()],
        );
        assert!(guard.check(&headers(None, Some("localhost:8080"))).is_ok());
        assert!(guard.check(&headers(None, Some("127.0.0.1:8080"))).is_ok());

        let result = guard.check(&headers(None, Some("evil.example:8080")));
        assert!(matches!(result, Err(GateError::ForbiddenHost { .. })));
    }

    #[test]
    fn test_absent_host_rejected_when_list_active() {
        let guard = AllowListGuard::new(vec!["*".to_string()], vec!["localhost:8080".to_string()]);
        let result = guard.check(&headers(None, None));
        assert!(matches!(result, Err(GateError::ForbiddenHost { .. })));
    }
}
