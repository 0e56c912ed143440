//! Top-level fatal-condition error type.
//!
//! Library code never returns this type; each component owns a narrower
//! `thiserror` enum where failure is something a caller recovers from
//! (`protocol::ProtocolError`, `wallet::WalletError`, `valve::ValveError`).
//! Merchant's payment intake and USM's purchase attempts instead resolve
//! failures into values the spec already gives a closed vocabulary for — a
//! notice event, an aborted-attempt reason — since the propagation policy
//! (spec.md §7) is "translate into a notice code", not "bubble an error
//! type". `AppError` exists only at the process boundary (`main.rs`) to
//! translate a fatal startup condition into a readable exit.

use thiserror::Error;

/// Fatal conditions per spec: the wallet cannot be initialized with any
/// configured mint, the signing identity cannot be loaded, or the protocol
/// layer fails its own internal consistency check.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(String),

    #[error("failed to load signing identity: {0}")]
    Identity(String),

    #[error("wallet could not be initialized with any configured mint: {0}")]
    WalletInit(String),

    #[error("protocol layer failed its own internal consistency check: {0}")]
    ProtocolSelfCheck(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
