//! HTTP surface: the admission-then-forward pipeline and the server that
//! hosts it.

mod pipeline;
mod server;

pub use pipeline::{router, Gateway};
pub use server::GatewayServer;
