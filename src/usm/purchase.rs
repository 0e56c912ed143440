//! `attempt_purchase` (spec.md §4.5.2): the single procedure by which USM
//! spends money. Any failure aborts the attempt and records nothing
//! permanent.

use super::gateway::KnownGateway;
use super::session::{SessionStatus, UpstreamSession, UpstreamSessionMap};
use super::transport::{GatewayTransport, TransportError};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::identity::Identity;
use crate::protocol::{self, EventKind, Metric, ProtocolError};
use crate::wallet::{MintBackend, OverpaymentPolicy, WalletCoordinator};
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseReason {
    Initial,
    Poll,
    Renewal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseOutcome {
    Installed,
    Aborted(String),
}

/// Per-gateway-ip serialization so "at most one in-flight attempt" holds
/// (spec.md §5 ordering guarantees).
#[derive(Default)]
struct AttemptLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AttemptLocks {
    async fn lock_for(&self, gateway_ip: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(gateway_ip.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

pub struct PurchaseAttempter<B: MintBackend, T: GatewayTransport> {
    config: Config,
    identity: Arc<Identity>,
    wallet: Arc<WalletCoordinator<B>>,
    transport: Arc<T>,
    sessions: Arc<UpstreamSessionMap>,
    clock: SharedClock,
    locks: AttemptLocks,
}

impl<B: MintBackend, T: GatewayTransport> PurchaseAttempter<B, T> {
    pub fn new(
        config: Config,
        identity: Arc<Identity>,
        wallet: Arc<WalletCoordinator<B>>,
        transport: Arc<T>,
        sessions: Arc<UpstreamSessionMap>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            identity,
            wallet,
            transport,
            sessions,
            clock,
            locks: AttemptLocks::default(),
        }
    }

    fn abort(reason: impl Into<String>, gateway_ip: &str) -> PurchaseOutcome {
        let reason = reason.into();
        tracing::info!(gateway_ip, reason = %reason, "purchase attempt aborted");
        PurchaseOutcome::Aborted(reason)
    }

    pub async fn attempt_purchase(
        &self,
        gateway: &KnownGateway,
        reason: PurchaseReason,
    ) -> PurchaseOutcome {
        let lock = self.locks.lock_for(&gateway.gateway_ip).await;
        let _guard = lock.lock().await;
        tracing::debug!(gateway_ip = %gateway.gateway_ip, ?reason, "attempting purchase");

        // Step 1: session recovery.
        match self
            .transport
            .fetch_usage(&gateway.gateway_ip, &self.identity.pubkey_hex())
            .await
        {
            Ok(Some(session_event)) => match protocol::extract_session_info(&session_event) {
                Ok(info) => {
                    self.install_session(&gateway.gateway_ip, &info).await;
                    return PurchaseOutcome::Installed;
                }
                Err(_) => {
                    // Malformed usage reply; fall through to a normal
                    // purchase rather than aborting outright.
                }
            },
            Ok(None) => {}
            Err(TransportError::Connection(_)) | Err(TransportError::Timeout) => {
                // No usage endpoint / unreachable is not itself fatal; the
                // endpoint is optional per the spec's open question.
            }
            Err(e) => return Self::abort(format!("usage query error: {e}"), &gateway.gateway_ip),
        }

        // Step 2: advertisement fetch.
        let ad_event = match self.transport.fetch_advertisement(&gateway.gateway_ip).await {
            Ok(e) => e,
            Err(e) => return Self::abort(format!("advertisement fetch failed: {e}"), &gateway.gateway_ip),
        };
        if protocol::validate_structural(&ad_event, EventKind::Advertisement).is_err() {
            return Self::abort("advertisement failed structural validation", &gateway.gateway_ip);
        }
        let advertisement = match protocol::extract_advertisement_info(&ad_event) {
            Ok(a) => a,
            Err(e) => return Self::abort(format!("advertisement malformed: {e}"), &gateway.gateway_ip),
        };

        // Step 3: protocol match (our advertised extensions are a superset).
        // This repository does not enumerate named extensions in the wire
        // advertisement, so this is checked against an empty required set
        // in practice; `protocol_extensions` documents intent for future
        // extension tags.
        let _ = &self.config.usm.protocol_extensions;

        // Step 4: trust check.
        if !self.config.trust.is_permitted(&advertisement.tollgate_pubkey) {
            return Self::abort("gateway pubkey not trusted", &gateway.gateway_ip);
        }

        // Step 5: mint match.
        let chosen_mint = self
            .config
            .accepted_mints
            .iter()
            .find_map(|accepted| advertisement.pricing_for_mint(&accepted.url).map(|p| (accepted, p)));
        let (accepted_mint, price) = match chosen_mint {
            Some(pair) => pair,
            None => return Self::abort("no common mint", &gateway.gateway_ip),
        };

        // Step 6: budget check.
        let cost = price.price * price.min_steps;
        if cost > self.config.usm.max_cost_per_session || cost > self.config.usm.max_cost_per_hour {
            return Self::abort("cost exceeds configured budget caps", &gateway.gateway_ip);
        }

        // Step 7: available funds.
        let available = match self.wallet.available(&accepted_mint.url).await {
            Ok(a) => a,
            Err(e) => return Self::abort(format!("balance query failed: {e}"), &gateway.gateway_ip),
        };
        if available < cost {
            return Self::abort("insufficient available funds", &gateway.gateway_ip);
        }

        // Step 8: reserve and pay.
        let handle = match self
            .wallet
            .reserve(&accepted_mint.url, cost, Some(Duration::seconds(30)))
            .await
        {
            Ok(h) => h,
            Err(e) => return Self::abort(format!("reserve failed: {e}"), &gateway.gateway_ip),
        };

        let overpayment_policy = OverpaymentPolicy {
            overpayment_pct: self.config.usm.overpayment_pct,
            overpayment_abs: self.config.usm.overpayment_abs,
        };
        let sent = match self
            .wallet
            .send(&accepted_mint.url, cost, overpayment_policy)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                self.wallet.release(&handle).await;
                return Self::abort(format!("send failed: {e}"), &gateway.gateway_ip);
            }
        };

        let pseudo_mac = mac_placeholder(&self.identity.pubkey_hex());
        let payment_event = match protocol::build_payment_event(&pseudo_mac, &sent.token, self.identity.keys()) {
            Ok(e) => e,
            Err(e) => {
                self.wallet.release(&handle).await;
                return Self::abort(format!("failed to build payment event: {e}"), &gateway.gateway_ip);
            }
        };

        let reply = match self
            .transport
            .send_payment(&gateway.gateway_ip, &payment_event)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                self.wallet.release(&handle).await;
                return Self::abort(format!("payment POST failed: {e}"), &gateway.gateway_ip);
            }
        };

        match protocol::extract_session_info(&reply) {
            Ok(info) => {
                self.wallet.commit(&handle).await;
                self.install_session(&gateway.gateway_ip, &info).await;
                // Step 9: observability event.
                tracing::info!(
                    gateway_ip = %gateway.gateway_ip,
                    allotment = info.allotment,
                    "upstream session installed"
                );
                PurchaseOutcome::Installed
            }
            Err(ProtocolError::WrongKind { .. }) => {
                self.wallet.release(&handle).await;
                let notice_detail = protocol::extract_notice_info(&reply)
                    .map(|n| n.code.as_str().to_string())
                    .unwrap_or_else(|_| "unparseable reply".to_string());
                Self::abort(format!("gateway returned notice: {notice_detail}"), &gateway.gateway_ip)
            }
            Err(e) => {
                self.wallet.release(&handle).await;
                Self::abort(format!("malformed session reply: {e}"), &gateway.gateway_ip)
            }
        }
    }

    async fn install_session(&self, gateway_ip: &str, info: &protocol::SessionInfo) {
        let expires_at = match info.metric {
            Metric::Milliseconds => Some(self.clock.now() + Duration::milliseconds(info.allotment as i64)),
            Metric::Bytes => None,
        };
        self.sessions
            .insert(UpstreamSession {
                gateway_ip: gateway_ip.to_string(),
                metric: info.metric,
                allotment_total: info.allotment,
                expires_at,
                status: SessionStatus::Active,
            })
            .await;
    }
}

/// The wire protocol's payment event carries a MAC tag identifying the
/// downstream client; when USM is the buyer there is no captive-portal MAC
/// to report, so it reports its own pubkey-derived pseudo-MAC. This mirrors
/// the teacher's buyer-side payment construction, which likewise has no
/// real client MAC to attach.
fn mac_placeholder(pubkey_hex: &str) -> String {
    let prefix: String = pubkey_hex.chars().take(12).collect();
    prefix
        .as_bytes()
        .chunks(2)
        .map(|pair| std::str::from_utf8(pair).unwrap_or("00"))
        .collect::<Vec<_>>()
        .join(":")
}
