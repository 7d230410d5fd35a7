//! Edgegate - Edge Request Gatekeeper
//!
//! This crate implements an edge-deployed gatekeeper in front of a backend
//! API. Requests under the API mount prefix pass through fixed-window
//! admission control backed by a shared counter store, then are relayed to
//! a configured upstream origin with header and CORS rewriting.

pub mod config;
pub mod error;
pub mod gateway;
pub mod proxy;
pub mod ratelimit;
