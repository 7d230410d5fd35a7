//! Rate limit key generation and client identity extraction.

use axum::http::HeaderMap;

/// Client identifier used when no trusted address header is present.
///
/// All such callers share one bucket.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Address headers consulted in order when no override is configured.
pub const DEFAULT_CLIENT_HEADERS: [&str; 2] = ["cf-connecting-ip", "x-forwarded-for"];

/// Derive the client identifier from trusted proxy headers.
///
/// The first header with a non-empty value wins. The value is used verbatim.
pub fn client_identifier<S: AsRef<str>>(headers: &HeaderMap, header_names: &[S]) -> String {
    header_names
        .iter()
        .filter_map(|name| headers.get(name.as_ref()))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// A key that uniquely identifies one counter: a client, in a route class,
/// during one fixed window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub client: String,
    pub route_class: String,
    pub window_index: u64,
}

impl RateLimitKey {
    pub fn new(client: impl Into<String>, route_class: impl Into<String>, window_index: u64) -> Self {
        Self {
            client: client.into(),
            route_class: route_class.into(),
            window_index,
        }
    }

    /// Render the key as stored in the counter store, e.g.
    /// `rl:203.0.113.7:chat:28333333`.
    pub fn to_store_key(&self, prefix: &str) -> String {
        format!("{}:{}", prefix, self)
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.client, self.route_class, self.window_index)
    }
}
