//! Notice levels and the closed set of recognized notice codes (spec.md §3,
//! §7).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Warning,
    Info,
    Debug,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Info => "info",
            Level::Debug => "debug",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "error" => Some(Level::Error),
            "warning" => Some(Level::Warning),
            "info" => Some(Level::Info),
            "debug" => Some(Level::Debug),
            _ => None,
        }
    }
}

/// The closed set of machine-readable notice codes a seller may return in
/// place of a session event (spec.md §3, §7). Exhaustive match elsewhere in
/// this crate relies on this being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeCode {
    PaymentError,
    PaymentErrorTokenSpent,
    InvalidEvent,
    InsufficientFunds,
    InvalidMacAddress,
    MintNotAccepted,
    SessionError,
    /// Not one of spec.md §3's originally enumerated codes, but required by
    /// §4.4.1 step 5 ("other mint errors become `notice(error,
    /// payment-processing-failed)`") and §7's propagation policy table.
    PaymentProcessingFailed,
}

impl NoticeCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeCode::PaymentError => "payment-error",
            NoticeCode::PaymentErrorTokenSpent => "payment-error-token-spent",
            NoticeCode::InvalidEvent => "invalid-event",
            NoticeCode::InsufficientFunds => "insufficient-funds",
            NoticeCode::InvalidMacAddress => "invalid-mac-address",
            NoticeCode::MintNotAccepted => "mint-not-accepted",
            NoticeCode::SessionError => "session-error",
            NoticeCode::PaymentProcessingFailed => "payment-processing-failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "payment-error" => Some(NoticeCode::PaymentError),
            "payment-error-token-spent" => Some(NoticeCode::PaymentErrorTokenSpent),
            "invalid-event" => Some(NoticeCode::InvalidEvent),
            "insufficient-funds" => Some(NoticeCode::InsufficientFunds),
            "invalid-mac-address" => Some(NoticeCode::InvalidMacAddress),
            "mint-not-accepted" => Some(NoticeCode::MintNotAccepted),
            "session-error" => Some(NoticeCode::SessionError),
            "payment-processing-failed" => Some(NoticeCode::PaymentProcessingFailed),
            _ => None,
        }
    }
}
