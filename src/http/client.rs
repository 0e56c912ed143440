//! Outbound HTTP client (spec.md §6 "Outbound client"): advertisement GET,
//! usage GET, payment POST, each with its own per-call timeout (spec.md §5:
//! "15s default for payment, 10s for advertisement/usage"). Grounded on the
//! teacher's `tollgate::protocol::TollGateProtocol` (`fetch_advertisement`,
//! `send_payment`, per-request `.timeout(...)`), implementing
//! `usm::transport::GatewayTransport` so it drops into `PurchaseAttempter`
//! unchanged from the fake used in tests.

use crate::protocol;
use crate::usm::transport::{GatewayTransport, TransportError};
use async_trait::async_trait;
use nostr::Event;
use std::time::Duration;

const GATEWAY_PORT: u16 = 2121;
const ADVERTISEMENT_TIMEOUT: Duration = Duration::from_secs(10);
const USAGE_TIMEOUT: Duration = Duration::from_secs(10);
const PAYMENT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct GatewayClient {
    http: reqwest::Client,
}

impl GatewayClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn base_url(gateway_ip: &str) -> String {
        format!("http://{gateway_ip}:{GATEWAY_PORT}")
    }

    async fn fetch_event(&self, url: &str, timeout: Duration) -> Result<Event, TransportError> {
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_error)?;
        let value: serde_json::Value = response.json().await.map_err(classify_error)?;
        protocol::parse(&value).map_err(|e| TransportError::BadResponse(e.to_string()))
    }
}

impl Default for GatewayClient {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connection(e.to_string())
    } else {
        TransportError::BadResponse(e.to_string())
    }
}

#[async_trait]
impl GatewayTransport for GatewayClient {
    async fn fetch_advertisement(&self, gateway_ip: &str) -> Result<Event, TransportError> {
        self.fetch_event(&Self::base_url(gateway_ip), ADVERTISEMENT_TIMEOUT)
            .await
    }

    async fn fetch_usage(
        &self,
        gateway_ip: &str,
        our_pubkey: &str,
    ) -> Result<Option<Event>, TransportError> {
        let url = format!("{}/usage?pubkey={our_pubkey}", Self::base_url(gateway_ip));
        let response = self
            .http
            .get(&url)
            .timeout(USAGE_TIMEOUT)
            .send()
            .await
            .map_err(classify_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let value: serde_json::Value = response.json().await.map_err(classify_error)?;
        if value.is_null() {
            return Ok(None);
        }
        let event = protocol::parse(&value).map_err(|e| TransportError::BadResponse(e.to_string()))?;
        Ok(Some(event))
    }

    async fn send_payment(
        &self,
        gateway_ip: &str,
        payment_event: &Event,
    ) -> Result<Event, TransportError> {
        let response = self
            .http
            .post(Self::base_url(gateway_ip))
            .json(&protocol::serialize(payment_event))
            .timeout(PAYMENT_TIMEOUT)
            .send()
            .await
            .map_err(classify_error)?;
        let value: serde_json::Value = response.json().await.map_err(classify_error)?;
        protocol::parse(&value).map_err(|e| TransportError::BadResponse(e.to_string()))
    }
}
