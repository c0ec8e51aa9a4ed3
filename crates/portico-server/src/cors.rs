//! Origin and virtual-host policy for the HTTP-facing listeners.

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use glob::{MatchOptions, Pattern};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::error::{Result, ServerError};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Preflight cache lifetime
const CORS_MAX_AGE: Duration = Duration::from_secs(600);

/// List of allowed origins or host names. `*` allows everything; other
/// entries are glob patterns.
#[derive(Debug, Clone)]
pub struct AllowList {
    any: bool,
    patterns: Vec<Pattern>,
}

impl AllowList {
    pub fn new(entries: &[String]) -> Result<Self> {
        let mut any = false;
        let mut patterns = Vec::new();
        for entry in entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
            if entry == "*" {
                any = true;
                continue;
            }
            let pattern = Pattern::new(entry)
                .map_err(|e| ServerError::Config(format!("bad pattern {:?}: {}", entry, e)))?;
            patterns.push(pattern);
        }
        Ok(AllowList { any, patterns })
    }

    pub fn is_empty(&self) -> bool {
        !self.any && self.patterns.is_empty()
    }

    pub fn allows(&self, value: &str) -> bool {
        self.any
            || self
                .patterns
                .iter()
                .any(|p| p.matches_with(value, MATCH_OPTIONS))
    }
}

/// Installs the origin gate and CORS headers. An empty list leaves the
/// router untouched.
pub fn apply_origin_policy<S>(router: Router<S>, origins: &AllowList) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    if origins.is_empty() {
        return router;
    }
    let origins = Arc::new(origins.clone());
    router
        .layer(cors_layer(&origins))
        .layer(middleware::from_fn_with_state(origins, origin_gate))
}

/// Installs the `Host` header check. An empty list leaves the router untouched.
pub fn apply_vhost_policy<S>(router: Router<S>, vhosts: &AllowList) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    if vhosts.is_empty() {
        return router;
    }
    router.layer(middleware::from_fn_with_state(
        Arc::new(vhosts.clone()),
        vhost_gate,
    ))
}

fn cors_layer(origins: &Arc<AllowList>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .max_age(CORS_MAX_AGE);

    if origins.any {
        return layer.allow_origin(Any);
    }
    let origins = origins.clone();
    layer.allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        origin.to_str().map(|o| origins.allows(o)).unwrap_or(false)
    }))
}

/// True when the request carries no `Origin` or an allowed one
pub fn origin_allowed(origins: &AllowList, origin: Option<&HeaderValue>) -> bool {
    match origin {
        None => true,
        Some(value) => value.to_str().map(|o| origins.allows(o)).unwrap_or(false),
    }
}

async fn origin_gate(
    State(origins): State<Arc<AllowList>>,
    request: Request,
    next: Next,
) -> Response {
    if !origin_allowed(&origins, request.headers().get(header::ORIGIN)) {
        tracing::debug!(
            "Rejected request from origin {:?}",
            request.headers().get(header::ORIGIN)
        );
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    next.run(request).await
}

async fn vhost_gate(
    State(vhosts): State<Arc<AllowList>>,
    request: Request,
    next: Next,
) -> Response {
    let allowed = match request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(strip_port)
    {
        // Requests without a Host header (HTTP/1.0) are not routed by name
        None => true,
        // Direct IP access carries no name to check
        Some(host) => is_ip_literal(host) || vhosts.allows(host),
    };

    if !allowed {
        return (StatusCode::FORBIDDEN, "invalid host specified").into_response();
    }
    next.run(request).await
}

fn is_ip_literal(host: &str) -> bool {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok()
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.find(']').map(|end| &host[..=end]).unwrap_or(host);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> AllowList {
        AllowList::new(&entries.iter().map(|e| e.to_string()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn test_wildcard_allows_all() {
        let origins = list(&["*"]);
        assert!(!origins.is_empty());
        assert!(origins.allows("https://anything.example"));
    }

    #[test]
    fn test_patterns() {
        let origins = list(&["http://localhost:*", "https://*.example.com"]);
        assert!(origins.allows("http://localhost:3000"));
        assert!(origins.allows("https://App.Example.com"));
        assert!(!origins.allows("https://evil.test"));
    }

    #[test]
    fn test_empty_entries_ignored() {
        assert!(list(&[]).is_empty());
        assert!(list(&["", "  "]).is_empty());
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let err = AllowList::new(&["[".to_string()]).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("localhost:8080"), "localhost");
        assert_eq!(strip_port("localhost"), "localhost");
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
    }

    #[test]
    fn test_ip_literals() {
        assert!(is_ip_literal("127.0.0.1"));
        assert!(is_ip_literal("[::1]"));
        assert!(!is_ip_literal("localhost"));
    }

    #[test]
    fn test_missing_origin_is_allowed() {
        let origins = list(&["https://ok.example"]);
        assert!(origin_allowed(&origins, None));
        assert!(!origin_allowed(
            &origins,
            Some(&HeaderValue::from_static("https://no.example"))
        ));
    }
}
