//! Forwarding proxy: relays admitted requests to the upstream origin.

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::cors::{allow_origin, preflight_response, public_hostname, public_origin};
use crate::config::{CorsConfig, UpstreamConfig};
use crate::error::Result;

pub const HEADER_FORWARDED_HOST: &str = "x-forwarded-host";
pub const HEADER_PROXIED_BY: &str = "x-proxied-by";

/// `error` discriminator of the 502 body.
pub const UPSTREAM_UNREACHABLE: &str = "Upstream unreachable";

/// Connection-scoped headers the server re-derives for the relayed body.
const CONNECTION_HEADERS: [&str; 3] = ["connection", "keep-alive", "transfer-encoding"];

/// Body framing headers that must not reach the upstream when the body is
/// not relayed.
const BODY_FRAMING_HEADERS: [&str; 2] = ["content-length", "transfer-encoding"];

/// Chunks buffered between the inbound body and the upstream request.
const BODY_CHANNEL_CAPACITY: usize = 16;

/// Relays requests to one upstream origin.
///
/// Every request is independent. Nothing is cached and nothing is retried.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    upstream: UpstreamConfig,
    cors: CorsConfig,
    mount_prefix: String,
}

impl Forwarder {
    /// Create a forwarder with a client bounded by the upstream timeouts.
    pub fn new(
        upstream: UpstreamConfig,
        cors: CorsConfig,
        mount_prefix: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(upstream.timeout_secs))
            .connect_timeout(Duration::from_secs(upstream.connect_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            upstream,
            cors,
            mount_prefix: mount_prefix.into(),
        })
    }

    /// Map an inbound path and query onto the upstream origin.
    ///
    /// `/api/chat?x=1` becomes `https://{host}/chat?x=1`.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> String {
        let rest = path
            .strip_prefix(self.mount_prefix.as_str())
            .unwrap_or_else(|| path.trim_start_matches('/'));

        let mut url = format!("{}://{}/{}", self.upstream.scheme, self.upstream.host, rest);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// Answer a preflight or relay the request.
    pub async fn handle(&self, req: Request) -> Response {
        if req.method() == Method::OPTIONS {
            return self.preflight(req.headers(), req.uri());
        }
        self.forward(req).await
    }

    /// The `204` preflight answer. Never touches the upstream.
    pub fn preflight(&self, headers: &HeaderMap, uri: &Uri) -> Response {
        let origin = public_origin(headers, uri);
        preflight_response(&self.cors, origin.as_deref())
    }

    /// Relay a non-preflight request and decorate the upstream response.
    ///
    /// Transport failures become a structured `502`.
    pub async fn forward(&self, req: Request) -> Response {
        let (parts, body) = req.into_parts();
        let origin = public_origin(&parts.headers, &parts.uri);
        let target = self.target_url(parts.uri.path(), parts.uri.query());

        match self.relay(&parts, body, &target).await {
            Ok(mut response) => {
                let headers = response.headers_mut();
                allow_origin(headers, origin.as_deref());
                if let Ok(marker) = HeaderValue::from_str(&self.upstream.proxy_marker) {
                    headers.insert(HEADER_PROXIED_BY, marker);
                }
                response
            }
            Err(e) => {
                warn!(method = %parts.method, url = %target, error = %e, "Upstream unreachable");
                upstream_unreachable(&e.to_string())
            }
        }
    }

    /// Headers sent upstream: the inbound set without `host`, plus
    /// `X-Forwarded-Host` carrying the public host name.
    pub fn upstream_headers(&self, inbound: &HeaderMap, uri: &Uri) -> HeaderMap {
        let mut headers = inbound.clone();
        headers.remove(header::HOST);

        if let Some(hostname) =
            public_hostname(inbound, uri).and_then(|h| HeaderValue::from_str(&h).ok())
        {
            headers.insert(HEADER_FORWARDED_HOST, hostname);
        }
        headers
    }

    async fn relay(&self, parts: &Parts, body: Body, target: &str) -> Result<Response> {
        let mut headers = self.upstream_headers(&parts.headers, &parts.uri);
        let relay_body = parts.method != Method::GET && parts.method != Method::HEAD;
        if !relay_body {
            for name in BODY_FRAMING_HEADERS {
                headers.remove(name);
            }
        }

        let mut request = self
            .client
            .request(parts.method.clone(), target)
            .headers(headers);
        if relay_body {
            request = request.body(streaming_body(body));
        }

        let upstream = request.send().await?;
        let status = upstream.status();
        debug!(url = target, status = status.as_u16(), "Upstream responded");

        let mut headers = upstream.headers().clone();
        for name in CONNECTION_HEADERS {
            headers.remove(name);
        }

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Pipe the inbound body into an upstream request body chunk by chunk,
/// without buffering it.
///
/// The axum body stream is `Send` but not `Sync`, so it is relayed through a
/// channel whose receiver satisfies the bounds of `reqwest::Body::wrap_stream`.
fn streaming_body(body: Body) -> reqwest::Body {
    let (tx, rx) = mpsc::channel::<std::result::Result<Bytes, axum::Error>>(BODY_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });

    reqwest::Body::wrap_stream(ReceiverStream::new(rx))
}

/// The `502` returned when the upstream cannot be reached.
pub fn upstream_unreachable(detail: &str) -> Response {
    let detail = if detail.is_empty() {
        "Unknown proxy error"
    } else {
        detail
    };
    let body = serde_json::json!({
        "error": UPSTREAM_UNREACHABLE,
        "detail": detail,
    });
    (StatusCode::BAD_GATEWAY, Json(body)).into_response()
}
