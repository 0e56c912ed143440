//! HTTP transport (spec.md §6): the inbound axum server Merchant exposes,
//! the outbound reqwest client USM uses, and the internal relay both sides
//! publish session/notice events to.

pub mod client;
pub mod relay;
pub mod server;

pub use client::GatewayClient;
pub use relay::LocalRelay;
pub use server::{router, serve, ServerState};
