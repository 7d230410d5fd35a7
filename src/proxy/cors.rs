//! CORS preflight handling and origin reflection.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Response, StatusCode, Uri};

use crate::config::CorsConfig;

/// The host the caller addressed, from `Host` or the request authority.
pub fn public_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.as_str().to_string()))
}

/// The public host name without a port.
pub fn public_hostname(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let host = public_host(headers, uri)?;
    // Bracketed IPv6 literals keep their brackets.
    let hostname = if host.starts_with('[') {
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host.as_str(),
        }
    } else {
        host.split(':').next().unwrap_or(&host)
    };
    Some(hostname.to_string())
}

/// The gateway's own public origin, e.g. `https://app.example.com`.
///
/// Scheme comes from `X-Forwarded-Proto` when an outer proxy terminated TLS,
/// otherwise `https`.
pub fn public_origin(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let host = public_host(headers, uri)?;
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .filter(|v| *v == "http" || *v == "https")
        .or_else(|| uri.scheme_str())
        .unwrap_or("https");
    Some(format!("{}://{}", scheme, host))
}

/// Set `Access-Control-Allow-Origin` to the reflected origin.
pub fn allow_origin(headers: &mut HeaderMap, origin: Option<&str>) {
    if let Some(value) = origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
}

/// Build the `204 No Content` answer to an `OPTIONS` preflight.
pub fn preflight_response(cors: &CorsConfig, origin: Option<&str>) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;

    let headers = response.headers_mut();
    allow_origin(headers, origin);
    if let Ok(methods) = HeaderValue::from_str(&cors.allowed_methods.join(", ")) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, methods);
    }
    if let Ok(allowed) = HeaderValue::from_str(&cors.allowed_headers.join(", ")) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allowed);
    }
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(cors.max_age_secs));

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_headers(host: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static(host));
        headers
    }

    #[test]
    fn test_public_origin_defaults_to_https() {
        let headers = host_headers("app.example.com");
        let uri: Uri = "/api/chat".parse().unwrap();
        assert_eq!(
            public_origin(&headers, &uri).as_deref(),
            Some("https://app.example.com")
        );
    }

    #[test]
    fn test_public_origin_honours_forwarded_proto() {
        let mut headers = host_headers("localhost:8080");
        headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
        let uri: Uri = "/api/chat".parse().unwrap();
        assert_eq!(
            public_origin(&headers, &uri).as_deref(),
            Some("http://localhost:8080")
        );
    }

    #[test]
    fn test_public_host_from_authority() {
        let uri: Uri = "https://edge.example.com/api/x".parse().unwrap();
        assert_eq!(
            public_host(&HeaderMap::new(), &uri).as_deref(),
            Some("edge.example.com")
        );
        assert_eq!(
            public_origin(&HeaderMap::new(), &uri).as_deref(),
            Some("https://edge.example.com")
        );
    }

    #[test]
    fn test_public_hostname_strips_port() {
        let uri: Uri = "/".parse().unwrap();
        assert_eq!(
            public_hostname(&host_headers("app.example.com:8443"), &uri).as_deref(),
            Some("app.example.com")
        );
        assert_eq!(
            public_hostname(&host_headers("[::1]:8080"), &uri).as_deref(),
            Some("[::1]")
        );
    }

    #[test]
    fn test_no_host_no_origin() {
        let uri: Uri = "/api/chat".parse().unwrap();
        assert!(public_origin(&HeaderMap::new(), &uri).is_none());
    }

    #[test]
    fn test_preflight_response() {
        let response = preflight_response(&CorsConfig::default(), Some("https://app.example.com"));

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "https://app.example.com");
        assert_eq!(
            headers["access-control-allow-methods"],
            "GET, POST, PUT, DELETE, OPTIONS"
        );
        assert_eq!(
            headers["access-control-allow-headers"],
            "Content-Type, Authorization, X-API-Key, CF-Access-Jwt-Assertion"
        );
        assert_eq!(headers["access-control-max-age"], "86400");
    }
}
