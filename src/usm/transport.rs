//! `GatewayTransport`: the outbound HTTP capability USM needs (spec.md §6
//! "Outbound client": advertisement GET, usage GET, payment POST). Kept as
//! a trait, the same way `MintBackend`/`GateControl`/`StatsProbe` are, so
//! `attempt_purchase` is unit-testable without a real network; the
//! production implementation is `http::client::GatewayClient`.

use async_trait::async_trait;
use nostr::Event;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("unexpected response: {0}")]
    BadResponse(String),
}

#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// `GET {gateway_ip}:2121/`
    async fn fetch_advertisement(&self, gateway_ip: &str) -> Result<Event, TransportError>;

    /// `GET {gateway_ip}:2121/usage` — `Ok(None)` if the gateway reports no
    /// live session for us.
    async fn fetch_usage(
        &self,
        gateway_ip: &str,
        our_pubkey: &str,
    ) -> Result<Option<Event>, TransportError>;

    /// `POST {gateway_ip}:2121/` with a signed payment event body; the
    /// response is either a session event or a notice event, both handed
    /// back unparsed for the caller to interpret.
    async fn send_payment(
        &self,
        gateway_ip: &str,
        payment_event: &Event,
    ) -> Result<Event, TransportError>;
}

/// In-memory transport for tests: gateways are scripted in advance. Kept
/// unconditionally compiled (not `#[cfg(test)]`) so integration tests under
/// `tests/` can use it, matching `wallet::backend::fake`.
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone)]
    pub enum ScriptedResponse {
        Advertisement(Event),
        SessionOrNotice(Event),
        Usage(Option<Event>),
        Fail(TransportError),
    }

    #[derive(Default)]
    pub struct FakeGatewayTransport {
        advertisements: Mutex<HashMap<String, ScriptedResponse>>,
        usage: Mutex<HashMap<String, ScriptedResponse>>,
        payment_replies: Mutex<HashMap<String, ScriptedResponse>>,
    }

    impl FakeGatewayTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script_advertisement(&self, gateway_ip: &str, response: ScriptedResponse) {
            self.advertisements
                .lock()
                .unwrap()
                .insert(gateway_ip.to_string(), response);
        }

        pub fn script_usage(&self, gateway_ip: &str, response: ScriptedResponse) {
            self.usage
                .lock()
                .unwrap()
                .insert(gateway_ip.to_string(), response);
        }

        pub fn script_payment_reply(&self, gateway_ip: &str, response: ScriptedResponse) {
            self.payment_replies
                .lock()
                .unwrap()
                .insert(gateway_ip.to_string(), response);
        }
    }

    #[async_trait]
    impl GatewayTransport for FakeGatewayTransport {
        async fn fetch_advertisement(&self, gateway_ip: &str) -> Result<Event, TransportError> {
            match self.advertisements.lock().unwrap().get(gateway_ip).cloned() {
                Some(ScriptedResponse::Advertisement(e)) => Ok(e),
                Some(ScriptedResponse::Fail(e)) => Err(e),
                _ => Err(TransportError::Connection("no script for gateway".into())),
            }
        }

        async fn fetch_usage(
            &self,
            gateway_ip: &str,
            _our_pubkey: &str,
        ) -> Result<Option<Event>, TransportError> {
            match self.usage.lock().unwrap().get(gateway_ip).cloned() {
                Some(ScriptedResponse::Usage(e)) => Ok(e),
                Some(ScriptedResponse::Fail(e)) => Err(e),
                None => Ok(None),
                _ => Err(TransportError::BadResponse("unexpected script".into())),
            }
        }

        async fn send_payment(
            &self,
            gateway_ip: &str,
            _payment_event: &Event,
        ) -> Result<Event, TransportError> {
            match self.payment_replies.lock().unwrap().get(gateway_ip).cloned() {
                Some(ScriptedResponse::SessionOrNotice(e)) => Ok(e),
                Some(ScriptedResponse::Fail(e)) => Err(e),
                _ => Err(TransportError::Connection("no script for gateway".into())),
            }
        }
    }
}
