//! Forwarding proxy to the upstream origin.

mod cors;
mod forwarder;

pub use cors::{allow_origin, preflight_response, public_host, public_hostname, public_origin};
pub use forwarder::{
    upstream_unreachable, Forwarder, HEADER_FORWARDED_HOST, HEADER_PROXIED_BY,
    UPSTREAM_UNREACHABLE,
};
