//! Admission controller: fixed-window admission against a shared counter
//! store.

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::key::{client_identifier, RateLimitKey, DEFAULT_CLIENT_HEADERS};
use super::rules::{PolicyTable, QuotaPolicy};
use super::store::CounterStore;
use super::window::{Clock, FixedWindow, SystemClock};
use crate::error::Result;

/// Default counter key prefix.
pub const DEFAULT_KEY_PREFIX: &str = "rl";
/// Default API mount prefix.
pub const DEFAULT_MOUNT_PREFIX: &str = "/api/";

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";

/// What to do when a configured store fails a read or write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreErrorPolicy {
    /// Surface the failure to the caller as a 503.
    #[default]
    Reject,
    /// Log and admit, as if no store were configured.
    Allow,
}

/// Quota bookkeeping for one admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub limit: u64,
    pub remaining: u64,
    /// Unix second at which the next window begins
    pub reset_at: u64,
    /// Seconds a rejected caller should wait (the window length)
    pub retry_after: u64,
}

impl QuotaStatus {
    /// Set the three `X-RateLimit-*` headers.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(HEADER_LIMIT, HeaderValue::from(self.limit));
        headers.insert(HEADER_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(HEADER_RESET, HeaderValue::from(self.reset_at));
    }

    /// The 429 returned to a caller over quota.
    pub fn rejection_response(&self) -> Response {
        let body = serde_json::json!({
            "error": "Too Many Requests",
            "retryAfter": self.retry_after,
            "limit": self.limit,
        });

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(self.retry_after));
        self.apply_headers(headers);
        response
    }
}

/// The outcome of [`AdmissionController::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Path is outside the mount prefix; admission control does not apply.
    Bypass,
    /// No quota applies to this route class.
    Unlimited,
    /// No counter store is configured; admitted without counting.
    FailOpen,
    /// Within quota; one unit has been consumed.
    Admitted(QuotaStatus),
    /// Over quota.
    Denied(QuotaStatus),
}

impl Admission {
    pub fn is_denied(&self) -> bool {
        matches!(self, Admission::Denied(_))
    }

    /// Quota headers to attach, if this decision was counted.
    pub fn quota(&self) -> Option<&QuotaStatus> {
        match self {
            Admission::Admitted(status) | Admission::Denied(status) => Some(status),
            _ => None,
        }
    }
}

/// Decides, per request, whether it may proceed.
///
/// The read-then-write against the store is not atomic: concurrent requests
/// for the same key can both read a count below the limit and both be
/// admitted. Enforcement is best-effort under concurrency.
pub struct AdmissionController {
    mount_prefix: String,
    policies: PolicyTable,
    /// `None` means no store is configured and every request fails open.
    store: Option<Arc<dyn CounterStore>>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
    client_headers: Vec<String>,
    store_error_policy: StoreErrorPolicy,
}

impl AdmissionController {
    /// Create a controller over `policies`, counting in `store` when present.
    pub fn new(policies: PolicyTable, store: Option<Arc<dyn CounterStore>>) -> Self {
        Self {
            mount_prefix: DEFAULT_MOUNT_PREFIX.to_string(),
            policies,
            store,
            clock: Arc::new(SystemClock),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            client_headers: DEFAULT_CLIENT_HEADERS.iter().map(|h| h.to_string()).collect(),
            store_error_policy: StoreErrorPolicy::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_mount_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.mount_prefix = prefix.into();
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Override the trusted client address headers, consulted in order.
    pub fn with_client_headers(mut self, headers: Vec<String>) -> Self {
        if !headers.is_empty() {
            self.client_headers = headers;
        }
        self
    }

    pub fn with_store_error_policy(mut self, policy: StoreErrorPolicy) -> Self {
        self.store_error_policy = policy;
        self
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Evaluate and record admission for a request.
    ///
    /// Admitted requests consume one unit immediately, before the request
    /// is forwarded. The unit is not refunded if forwarding later fails.
    ///
    /// Returns `Err` only for store failures under
    /// [`StoreErrorPolicy::Reject`].
    pub async fn check(&self, path: &str, headers: &HeaderMap) -> Result<Admission> {
        if !path.starts_with(&self.mount_prefix) {
            trace!(path, "Outside mount prefix, bypassing admission");
            return Ok(Admission::Bypass);
        }

        let Some(route) = self.policies.classify(path) else {
            trace!(path, "No route rule matched");
            return Ok(Admission::Unlimited);
        };
        let Some(policy) = route.policy else {
            trace!(path, class = route.class, "Route class is unlimited");
            return Ok(Admission::Unlimited);
        };

        let Some(store) = self.store.as_deref() else {
            debug!(path, class = route.class, "No counter store configured, failing open");
            return Ok(Admission::FailOpen);
        };

        let client = client_identifier(headers, &self.client_headers);
        let window = FixedWindow::at(self.clock.now_unix(), policy.window_secs);
        let key = RateLimitKey::new(client, route.class, window.index);

        match self.count(store, &key, policy, window).await {
            Ok(admission) => Ok(admission),
            Err(e) => match self.store_error_policy {
                StoreErrorPolicy::Reject => {
                    warn!(key = %key, error = %e, "Counter store failed, rejecting request");
                    Err(e)
                }
                StoreErrorPolicy::Allow => {
                    warn!(key = %key, error = %e, "Counter store failed, admitting request");
                    Ok(Admission::FailOpen)
                }
            },
        }
    }

    async fn count(
        &self,
        store: &dyn CounterStore,
        key: &RateLimitKey,
        policy: QuotaPolicy,
        window: FixedWindow,
    ) -> Result<Admission> {
        let store_key = key.to_store_key(&self.key_prefix);
        let current = store.get(&store_key).await?.unwrap_or(0);

        trace!(
            key = %store_key,
            current,
            limit = policy.max_requests,
            "Checking rate limit"
        );

        if current >= policy.max_requests {
            info!(
                key = %key,
                limit = policy.max_requests,
                "Rate limit exceeded"
            );
            return Ok(Admission::Denied(QuotaStatus {
                limit: policy.max_requests,
                remaining: 0,
                reset_at: window.reset_at(),
                retry_after: policy.window_secs,
            }));
        }

        store
            .put(&store_key, current + 1, window.counter_ttl())
            .await?;

        let remaining = policy.max_requests.saturating_sub(current + 1);
        debug!(key = %key, remaining, "Request admitted");

        Ok(Admission::Admitted(QuotaStatus {
            limit: policy.max_requests,
            remaining,
            reset_at: window.reset_at(),
            retry_after: policy.window_secs,
        }))
    }
}
