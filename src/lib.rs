//! `tollgate_core` — the Merchant / USM / Wallet / Valve / Protocol core of a
//! TollGate gateway, independent of the OS-specific bindings (captive portal,
//! stats probe, HTTP transport internals) that a platform integrator supplies.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod merchant;
pub mod protocol;
pub mod usm;
pub mod valve;
pub mod wallet;
