//! Event shapes (spec.md §3, §6). These are the decoded, typed forms the
//! rest of the crate works with; `validate.rs` is what turns a raw
//! `nostr::Event` into one of these (or rejects it).

use serde::{Deserialize, Serialize};

/// Distinct, fixed kind numbers for the four event shapes (spec.md §6: "the
/// contract is that the four are distinct and fixed"). Pinned in a
/// contiguous custom-event range, grounded on the teacher's kind choices
/// (10021/21000/1022) but made internally consistent for this repository.
pub const ADVERTISEMENT_KIND: u16 = 21120;
pub const PAYMENT_KIND: u16 = 21121;
pub const SESSION_KIND: u16 = 21122;
pub const NOTICE_KIND: u16 = 21123;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Advertisement,
    Payment,
    Session,
    Notice,
}

impl EventKind {
    pub fn wire_kind(&self) -> u16 {
        match self {
            EventKind::Advertisement => ADVERTISEMENT_KIND,
            EventKind::Payment => PAYMENT_KIND,
            EventKind::Session => SESSION_KIND,
            EventKind::Notice => NOTICE_KIND,
        }
    }

    pub fn from_wire_kind(kind: u16) -> Option<Self> {
        match kind {
            ADVERTISEMENT_KIND => Some(EventKind::Advertisement),
            PAYMENT_KIND => Some(EventKind::Payment),
            SESSION_KIND => Some(EventKind::Session),
            NOTICE_KIND => Some(EventKind::Notice),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Milliseconds,
    Bytes,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Milliseconds => "milliseconds",
            Metric::Bytes => "bytes",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "milliseconds" => Some(Metric::Milliseconds),
            "bytes" => Some(Metric::Bytes),
            _ => None,
        }
    }
}

/// One `price_per_step` tuple from an advertisement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePerStep {
    pub asset_type: String,
    pub price: u64,
    pub unit: String,
    pub mint_url: String,
    pub min_steps: u64,
}

/// Decoded advertisement (spec.md §3 "Advertisement").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertisementInfo {
    pub tollgate_pubkey: String,
    pub metric: Metric,
    pub step_size: u64,
    pub pricing: Vec<PricePerStep>,
    pub tips: Vec<u32>,
}

impl AdvertisementInfo {
    /// The cheapest-first pricing entry accepting `mint_url`.
    pub fn pricing_for_mint(&self, mint_url: &str) -> Option<&PricePerStep> {
        self.pricing.iter().find(|p| p.mint_url == mint_url)
    }
}

/// Decoded payment event (spec.md §3 "Payment Event").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub event_id: String,
    pub buyer_pubkey: String,
    pub mac: String,
    pub cashu_token: String,
}

/// Decoded session event (spec.md §3 "Session Event").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub event_id: String,
    pub seller_pubkey: String,
    pub buyer_pubkey: String,
    pub mac: String,
    pub allotment: u64,
    pub metric: Metric,
}

/// Decoded notice event (spec.md §3 "Notice Event").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeInfo {
    pub event_id: String,
    pub seller_pubkey: String,
    pub level: super::Level,
    pub code: super::NoticeCode,
    pub recipient_pubkey: Option<String>,
}
