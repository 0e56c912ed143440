//! Validation, extraction and construction for each of the four event
//! shapes (spec.md §4.1). "Validation rejects: wrong event kind; missing
//! required tag; invalid signature; malformed numbers; empty pricing set."
//! `extract_advertisement_info` is "total and deterministic: it never
//! guesses defaults; a malformed pricing tuple is dropped, and if zero
//! remain, the whole advertisement fails validation."

use super::event::{
    AdvertisementInfo, EventKind, Metric, NoticeInfo, PaymentInfo, PricePerStep, SessionInfo,
    ADVERTISEMENT_KIND, NOTICE_KIND, PAYMENT_KIND, SESSION_KIND,
};
use super::tags::{first_tag_named, tag, tags_named};
use super::{Level, NoticeCode};
use nostr::{Event, Keys};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("wrong event kind: expected {expected:?}, got {got}")]
    WrongKind { expected: EventKind, got: u16 },

    #[error("missing required tag: {0}")]
    MissingTag(&'static str),

    #[error("no valid pricing entries in advertisement")]
    EmptyPricing,

    #[error("invalid mac address: {0}")]
    InvalidMac(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

fn require_kind(event: &Event, expected: EventKind) -> Result<(), ProtocolError> {
    let got = event.kind.as_u16();
    if got != expected.wire_kind() {
        return Err(ProtocolError::WrongKind { expected, got });
    }
    Ok(())
}

/// Validate a raw MAC address string, spec.md §6's
/// `XX:XX:XX:XX:XX:XX` shape.
pub fn validate_mac(mac: &str) -> Result<(), ProtocolError> {
    let parts: Vec<&str> = mac.split(':').collect();
    let ok = parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()));
    if ok {
        Ok(())
    } else {
        Err(ProtocolError::InvalidMac(mac.to_string()))
    }
}

/// Parse and validate an advertisement event, total and deterministic:
/// malformed `price_per_step` tuples are dropped rather than rejecting the
/// whole event, but zero surviving pricing entries is fatal.
pub fn extract_advertisement_info(event: &Event) -> Result<AdvertisementInfo, ProtocolError> {
    require_kind(event, EventKind::Advertisement)?;

    let metric_tag = first_tag_named(event, "metric").ok_or(ProtocolError::MissingTag("metric"))?;
    let metric = metric_tag
        .first()
        .and_then(|s| Metric::parse(s))
        .ok_or(ProtocolError::MissingTag("metric"))?;

    let step_size_tag =
        first_tag_named(event, "step_size").ok_or(ProtocolError::MissingTag("step_size"))?;
    let step_size: u64 = step_size_tag
        .first()
        .and_then(|s| s.parse().ok())
        .filter(|&n: &u64| n > 0)
        .ok_or(ProtocolError::MissingTag("step_size"))?;

    let pricing: Vec<PricePerStep> = tags_named(event, "price_per_step")
        .into_iter()
        .filter_map(|parts| {
            if parts.len() < 5 {
                return None;
            }
            let asset_type = parts[0].to_string();
            let price: u64 = parts[1].parse().ok()?;
            let unit = parts[2].to_string();
            let mint_url = parts[3].to_string();
            let min_steps: u64 = parts[4].parse().ok()?;
            if price == 0 || min_steps == 0 || asset_type != "cashu" {
                return None;
            }
            Some(PricePerStep {
                asset_type,
                price,
                unit,
                mint_url,
                min_steps,
            })
        })
        .collect();

    if pricing.is_empty() {
        return Err(ProtocolError::EmptyPricing);
    }

    let tips: Vec<u32> = first_tag_named(event, "tips")
        .map(|parts| parts.iter().filter_map(|s| s.parse().ok()).collect())
        .unwrap_or_default();

    Ok(AdvertisementInfo {
        tollgate_pubkey: event.pubkey.to_hex(),
        metric,
        step_size,
        pricing,
        tips,
    })
}

/// Build the tags for a new advertisement and sign it.
pub fn build_advertisement_event(
    metric: Metric,
    step_size: u64,
    pricing: &[PricePerStep],
    tips: &[u32],
    keys: &Keys,
) -> Result<Event, ProtocolError> {
    let mut tags = vec![
        tag(vec!["metric".into(), metric.as_str().into()]).unwrap(),
        tag(vec!["step_size".into(), step_size.to_string()]).unwrap(),
    ];
    for p in pricing {
        tags.push(
            tag(vec![
                "price_per_step".into(),
                p.asset_type.clone(),
                p.price.to_string(),
                p.unit.clone(),
                p.mint_url.clone(),
                p.min_steps.to_string(),
            ])
            .unwrap(),
        );
    }
    if !tips.is_empty() {
        let mut tip_tag = vec!["tips".to_string()];
        tip_tag.extend(tips.iter().map(|t| t.to_string()));
        tags.push(tag(tip_tag).unwrap());
    }
    super::sign(ADVERTISEMENT_KIND, tags, keys)
}

/// Parse and validate a payment event.
pub fn extract_payment_info(event: &Event) -> Result<PaymentInfo, ProtocolError> {
    require_kind(event, EventKind::Payment)?;

    let device = first_tag_named(event, "device-identifier")
        .ok_or(ProtocolError::MissingTag("device-identifier"))?;
    if device.len() < 2 || device[0] != "mac" {
        return Err(ProtocolError::MissingTag("device-identifier"));
    }
    let mac = device[1].to_string();
    validate_mac(&mac)?;

    let payment =
        first_tag_named(event, "payment").ok_or(ProtocolError::MissingTag("payment"))?;
    let cashu_token = payment
        .first()
        .ok_or(ProtocolError::MissingTag("payment"))?
        .to_string();

    Ok(PaymentInfo {
        event_id: event.id.to_hex(),
        buyer_pubkey: event.pubkey.to_hex(),
        mac,
        cashu_token,
    })
}

/// Build and sign a payment event from the buyer's side (used by USM).
pub fn build_payment_event(
    mac: &str,
    cashu_token: &str,
    buyer_keys: &Keys,
) -> Result<Event, ProtocolError> {
    validate_mac(mac)?;
    let tags = vec![
        tag(vec![
            "device-identifier".into(),
            "mac".into(),
            mac.to_string(),
        ])
        .unwrap(),
        tag(vec!["payment".into(), cashu_token.to_string()]).unwrap(),
    ];
    super::sign(PAYMENT_KIND, tags, buyer_keys)
}

/// Build and sign a session event from the seller's side (used by
/// Merchant).
pub fn build_session_event(
    buyer_pubkey: &str,
    mac: &str,
    allotment: u64,
    metric: Metric,
    seller_keys: &Keys,
) -> Result<Event, ProtocolError> {
    let tags = vec![
        tag(vec!["p".into(), buyer_pubkey.to_string()]).unwrap(),
        tag(vec![
            "device-identifier".into(),
            "mac".into(),
            mac.to_string(),
        ])
        .unwrap(),
        tag(vec!["allotment".into(), allotment.to_string()]).unwrap(),
        tag(vec!["metric".into(), metric.as_str().into()]).unwrap(),
    ];
    super::sign(SESSION_KIND, tags, seller_keys)
}

/// Parse and validate a session event.
pub fn extract_session_info(event: &Event) -> Result<SessionInfo, ProtocolError> {
    require_kind(event, EventKind::Session)?;

    let buyer_pubkey = first_tag_named(event, "p")
        .and_then(|p| p.first().map(|s| s.to_string()))
        .ok_or(ProtocolError::MissingTag("p"))?;

    let device = first_tag_named(event, "device-identifier")
        .ok_or(ProtocolError::MissingTag("device-identifier"))?;
    if device.len() < 2 || device[0] != "mac" {
        return Err(ProtocolError::MissingTag("device-identifier"));
    }
    let mac = device[1].to_string();

    let allotment: u64 = first_tag_named(event, "allotment")
        .and_then(|p| p.first().and_then(|s| s.parse().ok()))
        .ok_or(ProtocolError::MissingTag("allotment"))?;

    let metric = first_tag_named(event, "metric")
        .and_then(|p| p.first().and_then(|s| Metric::parse(s)))
        .ok_or(ProtocolError::MissingTag("metric"))?;

    Ok(SessionInfo {
        event_id: event.id.to_hex(),
        seller_pubkey: event.pubkey.to_hex(),
        buyer_pubkey,
        mac,
        allotment,
        metric,
    })
}

/// Build and sign a notice event.
pub fn build_notice_event(
    level: Level,
    code: NoticeCode,
    recipient_pubkey: Option<&str>,
    seller_keys: &Keys,
) -> Result<Event, ProtocolError> {
    let mut tags = vec![
        tag(vec!["level".into(), level.as_str().into()]).unwrap(),
        tag(vec!["code".into(), code.as_str().into()]).unwrap(),
    ];
    if let Some(p) = recipient_pubkey {
        tags.push(tag(vec!["p".into(), p.to_string()]).unwrap());
    }
    super::sign(NOTICE_KIND, tags, seller_keys)
}

/// Parse and validate a notice event.
pub fn extract_notice_info(event: &Event) -> Result<NoticeInfo, ProtocolError> {
    require_kind(event, EventKind::Notice)?;

    let level = first_tag_named(event, "level")
        .and_then(|p| p.first().and_then(|s| Level::parse(s)))
        .ok_or(ProtocolError::MissingTag("level"))?;
    let code = first_tag_named(event, "code")
        .and_then(|p| p.first().and_then(|s| NoticeCode::parse(s)))
        .ok_or(ProtocolError::MissingTag("code"))?;
    let recipient_pubkey = first_tag_named(event, "p").and_then(|p| p.first().map(|s| s.to_string()));

    Ok(NoticeInfo {
        event_id: event.id.to_hex(),
        seller_pubkey: event.pubkey.to_hex(),
        level,
        code,
        recipient_pubkey,
    })
}

/// Total structural validation entry point mirroring spec.md §4.1's list of
/// rejection reasons, used by Merchant's intake step 1 before any
/// kind-specific extraction.
pub fn validate_structural(event: &Event, expected: EventKind) -> Result<(), ProtocolError> {
    require_kind(event, expected)?;
    event
        .verify()
        .map_err(|e| ProtocolError::InvalidSignature(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pricing() -> Vec<PricePerStep> {
        vec![PricePerStep {
            asset_type: "cashu".into(),
            price: 1,
            unit: "sat".into(),
            mint_url: "https://mint.example.com".into(),
            min_steps: 1,
        }]
    }

    #[test]
    fn round_trips_advertisement() {
        let keys = Keys::generate();
        let event =
            build_advertisement_event(Metric::Milliseconds, 60000, &sample_pricing(), &[1], &keys)
                .unwrap();

        let info = extract_advertisement_info(&event).unwrap();
        assert_eq!(info.metric, Metric::Milliseconds);
        assert_eq!(info.step_size, 60000);
        assert_eq!(info.pricing.len(), 1);
        assert_eq!(info.tips, vec![1]);
    }

    #[test]
    fn drops_malformed_pricing_tuple_keeps_valid_ones() {
        let keys = Keys::generate();
        let mut tags = vec![
            tag(vec!["metric".into(), "bytes".into()]).unwrap(),
            tag(vec!["step_size".into(), "1000".into()]).unwrap(),
            tag(vec![
                "price_per_step".into(),
                "cashu".into(),
                "not_a_number".into(),
                "sat".into(),
                "https://mint".into(),
                "1".into(),
            ])
            .unwrap(),
        ];
        for p in &sample_pricing() {
            tags.push(
                tag(vec![
                    "price_per_step".into(),
                    p.asset_type.clone(),
                    p.price.to_string(),
                    p.unit.clone(),
                    p.mint_url.clone(),
                    p.min_steps.to_string(),
                ])
                .unwrap(),
            );
        }
        let event = super::super::sign(ADVERTISEMENT_KIND, tags, &keys).unwrap();

        let info = extract_advertisement_info(&event).unwrap();
        assert_eq!(info.pricing.len(), 1);
    }

    #[test]
    fn empty_pricing_fails_validation() {
        let keys = Keys::generate();
        let tags = vec![
            tag(vec!["metric".into(), "bytes".into()]).unwrap(),
            tag(vec!["step_size".into(), "1000".into()]).unwrap(),
        ];
        let event = super::super::sign(ADVERTISEMENT_KIND, tags, &keys).unwrap();

        assert_eq!(
            extract_advertisement_info(&event),
            Err(ProtocolError::EmptyPricing)
        );
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let keys = Keys::generate();
        let event = super::super::sign(PAYMENT_KIND, vec![], &keys).unwrap();
        assert!(extract_advertisement_info(&event).is_err());
    }

    #[test]
    fn round_trips_payment_and_session() {
        let buyer = Keys::generate();
        let seller = Keys::generate();

        let payment_event =
            build_payment_event("AA:BB:CC:DD:EE:01", "cashuAtoken", &buyer).unwrap();
        let payment = extract_payment_info(&payment_event).unwrap();
        assert_eq!(payment.mac, "AA:BB:CC:DD:EE:01");
        assert_eq!(payment.cashu_token, "cashuAtoken");

        let session_event = build_session_event(
            &payment.buyer_pubkey,
            &payment.mac,
            300_000,
            Metric::Milliseconds,
            &seller,
        )
        .unwrap();
        let session = extract_session_info(&session_event).unwrap();
        assert_eq!(session.allotment, 300_000);
        assert_eq!(session.buyer_pubkey, payment.buyer_pubkey);
    }

    #[test]
    fn round_trips_notice() {
        let seller = Keys::generate();
        let buyer = Keys::generate();
        let event = build_notice_event(
            Level::Error,
            NoticeCode::InsufficientFunds,
            Some(&buyer.public_key().to_hex()),
            &seller,
        )
        .unwrap();

        let notice = extract_notice_info(&event).unwrap();
        assert_eq!(notice.level, Level::Error);
        assert_eq!(notice.code, NoticeCode::InsufficientFunds);
        assert_eq!(notice.recipient_pubkey, Some(buyer.public_key().to_hex()));
    }

    #[test]
    fn invalid_mac_rejected() {
        let keys = Keys::generate();
        assert!(build_payment_event("not-a-mac", "token", &keys).is_err());
    }
}
