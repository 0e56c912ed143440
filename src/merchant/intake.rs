//! Payment intake: `purchase_session`, the 9-step procedure turning an
//! inbound payment event into a session event or a notice (spec.md §4.4.1).

use super::session::{CustomerSession, SessionKey, SessionMap};
use crate::clock::SharedClock;
use crate::config::{AcceptedMint, Config};
use crate::protocol::{
    self, EventKind, Metric, NoticeCode, ProtocolError,
};
use crate::valve::{Valve, GateControl, StatsProbe};
use crate::wallet::{MintBackend, WalletCoordinator, WalletError};
use chrono::Duration;
use nostr::{Event, Keys};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-(customer, mac) intake serialization (spec.md §4.4.1: "concurrent
/// requests for the same (customer_pubkey, mac) are serialized"). A
/// striped-by-key set of mutexes would scale better; a single mutex
/// matches the spec's own minimum requirement and keeps the critical
/// section auditable.
pub struct IntakeLock {
    locks: Mutex<HashMap<SessionKey, Arc<Mutex<()>>>>,
}

impl IntakeLock {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

impl Default for IntakeLock {
    fn default() -> Self {
        Self::new()
    }
}

/// What `purchase_session` hands back: either a signed session event or a
/// signed notice event, never both (spec.md §4.4.1 step 9).
pub enum IntakeOutcome {
    Session(Event),
    Notice(Event),
}

pub struct Merchant<B: MintBackend, G: GateControl, S: StatsProbe> {
    config: Config,
    keys: Keys,
    wallet: Arc<WalletCoordinator<B>>,
    valve: Arc<Valve<G, S>>,
    sessions: Arc<SessionMap>,
    intake_lock: IntakeLock,
    clock: SharedClock,
}

impl<B: MintBackend, G: GateControl, S: StatsProbe> Merchant<B, G, S> {
    /// Shares the wallet's clock rather than reaching for `Utc::now()`
    /// directly, so a `FixedClock`-driven scenario test sees consistent
    /// deadlines across both wallet reservation expiry and session expiry.
    pub fn new(
        config: Config,
        keys: Keys,
        wallet: Arc<WalletCoordinator<B>>,
        valve: Arc<Valve<G, S>>,
        sessions: Arc<SessionMap>,
    ) -> Self {
        let clock = wallet.clock().clone();
        Self {
            config,
            keys,
            wallet,
            valve,
            sessions,
            intake_lock: IntakeLock::new(),
            clock,
        }
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    fn notice(&self, code: NoticeCode, recipient: Option<&str>) -> IntakeOutcome {
        let event = protocol::build_notice_event(protocol::Level::Error, code, recipient, &self.keys)
            .expect("signing a notice with our own keys cannot fail");
        IntakeOutcome::Notice(event)
    }

    fn find_accepted_mint(&self, mint_url: &str) -> Option<&AcceptedMint> {
        self.config.accepted_mints.iter().find(|m| m.url == mint_url)
    }

    /// `purchase_session(payment_event) -> session_event | notice_event`
    /// (spec.md §4.4.1, 9 steps).
    pub async fn purchase_session(&self, payment_event: &Event) -> IntakeOutcome {
        // Step 1: structural validation.
        if protocol::validate_structural(payment_event, EventKind::Payment).is_err() {
            return self.notice(NoticeCode::InvalidEvent, None);
        }

        let payment = match protocol::extract_payment_info(payment_event) {
            Ok(p) => p,
            Err(ProtocolError::InvalidMac(_)) => {
                return self.notice(NoticeCode::InvalidMacAddress, None)
            }
            Err(_) => return self.notice(NoticeCode::InvalidEvent, None),
        };

        // Step 2: extract mac (already validated as part of extraction).
        let key = SessionKey {
            customer_pubkey: payment.buyer_pubkey.clone(),
            mac: payment.mac.clone(),
        };

        let lock = self.intake_lock.lock_for(&key).await;
        let _guard = lock.lock().await;

        // Step 3: dedup by payment_event.id. Checked only after acquiring
        // the per-key lock, so two concurrent replays of the same
        // payment_event.id can't both observe "no prior result" and both
        // fall through to re-spend an already-redeemed token (spec.md §8:
        // "purchase_session(e) is idempotent in e.id").
        if let Some(prior_session_id) = self.sessions.previous_result(&payment.event_id).await {
            if let Some(session) = self.sessions.get(&key).await {
                let event = protocol::build_session_event(
                    &session.customer_pubkey,
                    &session.mac,
                    session.allotment_total,
                    session.metric,
                    &self.keys,
                )
                .expect("signing a session event with our own keys cannot fail");
                tracing::debug!(
                    payment_event = %payment.event_id,
                    prior_session_event = %prior_session_id,
                    "replayed payment; returning prior session result"
                );
                return IntakeOutcome::Session(event);
            }
            // The prior session was since terminated; a novel replay after
            // termination behaves as a new purchase (spec.md §4.4.1 step 3).
        }

        // Step 4: mint membership.
        let accepted_mint = match self.wallet.backend().peek_mint_url(&payment.cashu_token) {
            Ok(mint_url) => match self.find_accepted_mint(&mint_url) {
                Some(m) => m.clone(),
                None => return self.notice(NoticeCode::MintNotAccepted, Some(&payment.buyer_pubkey)),
            },
            Err(_) => return self.notice(NoticeCode::PaymentError, Some(&payment.buyer_pubkey)),
        };

        // Step 5: receive.
        let redeemed = match self.wallet.receive(&payment.cashu_token).await {
            Ok(r) => r,
            Err(WalletError::TokenAlreadySpent) => {
                return self.notice(
                    NoticeCode::PaymentErrorTokenSpent,
                    Some(&payment.buyer_pubkey),
                )
            }
            Err(_) => {
                return self.notice(
                    NoticeCode::PaymentProcessingFailed,
                    Some(&payment.buyer_pubkey),
                )
            }
        };

        // Step 6: steps purchased.
        let steps = redeemed.amount / accepted_mint.price_per_step;
        if steps < accepted_mint.min_purchase_steps {
            return self.notice(NoticeCode::InsufficientFunds, Some(&payment.buyer_pubkey));
        }

        // Step 7: allotment delta.
        let allotment_delta = steps * self.config.step_size;

        // Step 8: existing session lookup and gate/baseline handling.
        let existing = self.sessions.get(&key).await;
        let (allotment_total, expires_at, consumed) = match existing {
            None => {
                let expires_at = match self.config.metric {
                    Metric::Milliseconds => {
                        Some(self.clock.now() + Duration::milliseconds(allotment_delta as i64))
                    }
                    Metric::Bytes => None,
                };
                if let Err(e) = self.valve.open_gate(&payment.mac, expires_at).await {
                    tracing::warn!(mac = %payment.mac, error = %e, "failed to open gate after payment");
                    return self.notice(
                        NoticeCode::PaymentProcessingFailed,
                        Some(&payment.buyer_pubkey),
                    );
                }
                (allotment_delta, expires_at, 0)
            }
            Some(session) => {
                let allotment_total = session.allotment_total + allotment_delta;
                let expires_at = match self.config.metric {
                    Metric::Milliseconds => session
                        .expires_at
                        .map(|e| e + Duration::milliseconds(allotment_delta as i64)),
                    Metric::Bytes => None,
                };
                (allotment_total, expires_at, session.consumed)
            }
        };

        self.sessions
            .insert(CustomerSession {
                customer_pubkey: payment.buyer_pubkey.clone(),
                mac: payment.mac.clone(),
                metric: self.config.metric,
                allotment_total,
                expires_at,
                strike_count: 0,
                consumed,
            })
            .await;

        // Step 9: sign, record for dedup, and return. Publishing to an
        // internal relay is best-effort and handled by the caller (http
        // layer), not here.
        let session_event = protocol::build_session_event(
            &payment.buyer_pubkey,
            &payment.mac,
            allotment_total,
            self.config.metric,
            &self.keys,
        )
        .expect("signing a session event with our own keys cannot fail");

        self.sessions
            .record_result(&payment.event_id, &session_event.id.to_hex())
            .await;

        IntakeOutcome::Session(session_event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::config::{AcceptedMint, Config, Trust};
    use crate::valve::{InMemoryGateControl, InMemoryStatsProbe};
    use crate::wallet::backend::fake::FakeMintBackend;

    fn test_config(metric: Metric) -> Config {
        Config {
            metric,
            step_size: 1000,
            accepted_mints: vec![AcceptedMint {
                url: "mint_a".into(),
                price_per_step: 1,
                price_unit: "sat".into(),
                min_purchase_steps: 1,
                min_payout_amount: 1000,
                min_balance: 0,
                balance_tolerance_percent: 0.0,
            }],
            profit_share: vec![],
            trust: Trust::default(),
            renewal_threshold_ms: 30000,
            renewal_threshold_bytes: 1_000_000,
            poll_interval_seconds: 60,
            enforcement_interval_seconds: 2,
            allow_swap_untrusted_mints: false,
            usm: Default::default(),
        }
    }

    fn merchant(
        metric: Metric,
    ) -> Merchant<FakeMintBackend, InMemoryGateControl, InMemoryStatsProbe> {
        let backend = Arc::new(FakeMintBackend::new(vec!["mint_a".into()]));
        let wallet = Arc::new(WalletCoordinator::new(backend, system_clock(), false));
        let valve = Arc::new(Valve::new(
            Arc::new(InMemoryGateControl::new()),
            Arc::new(InMemoryStatsProbe::new()),
        ));
        Merchant::new(
            test_config(metric),
            Keys::generate(),
            wallet,
            valve,
            Arc::new(SessionMap::new()),
        )
    }

    fn payment_event(buyer: &Keys, mac: &str, token: &str) -> Event {
        protocol::build_payment_event(mac, token, buyer).unwrap()
    }

    #[tokio::test]
    async fn first_purchase_opens_gate_and_creates_session() {
        let merchant = merchant(Metric::Milliseconds);
        let buyer = Keys::generate();
        let token = FakeMintBackend::make_token("mint_a", 5000, "t1");
        let event = payment_event(&buyer, "aa:bb:cc:dd:ee:ff", &token);

        match merchant.purchase_session(&event).await {
            IntakeOutcome::Session(session_event) => {
                let info = protocol::extract_session_info(&session_event).unwrap();
                assert_eq!(info.allotment, 5_000_000);
            }
            IntakeOutcome::Notice(_) => panic!("expected session, got notice"),
        }
        assert!(merchant.valve.has_baseline("aa:bb:cc:dd:ee:ff").await);
    }

    #[tokio::test]
    async fn second_purchase_extends_without_resetting_baseline() {
        let merchant = merchant(Metric::Bytes);
        let buyer = Keys::generate();

        let t1 = FakeMintBackend::make_token("mint_a", 1000, "t1");
        merchant
            .purchase_session(&payment_event(&buyer, "aa:bb:cc:dd:ee:ff", &t1))
            .await;

        merchant
            .valve
            .stats()
            .add_downloaded("aa:bb:cc:dd:ee:ff", 500)
            .await;

        let t2 = FakeMintBackend::make_token("mint_a", 1000, "t2");
        let outcome = merchant
            .purchase_session(&payment_event(&buyer, "aa:bb:cc:dd:ee:ff", &t2))
            .await;

        match outcome {
            IntakeOutcome::Session(session_event) => {
                let info = protocol::extract_session_info(&session_event).unwrap();
                assert_eq!(info.allotment, 2_000_000);
            }
            IntakeOutcome::Notice(_) => panic!("expected session"),
        }
        // The 500 bytes consumed between purchases must still show up.
        assert_eq!(
            merchant
                .valve
                .data_used_since_baseline("aa:bb:cc:dd:ee:ff")
                .await
                .unwrap(),
            500
        );
    }

    #[tokio::test]
    async fn replayed_payment_returns_same_session() {
        let merchant = merchant(Metric::Milliseconds);
        let buyer = Keys::generate();
        let token = FakeMintBackend::make_token("mint_a", 1000, "t1");
        let event = payment_event(&buyer, "aa:bb:cc:dd:ee:ff", &token);

        let first = match merchant.purchase_session(&event).await {
            IntakeOutcome::Session(e) => e.id,
            IntakeOutcome::Notice(_) => panic!("expected session"),
        };
        let second = match merchant.purchase_session(&event).await {
            IntakeOutcome::Session(e) => e.id,
            IntakeOutcome::Notice(_) => panic!("expected session on replay"),
        };
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn concurrent_replays_of_the_same_payment_both_see_the_session() {
        let merchant = merchant(Metric::Milliseconds);
        let buyer = Keys::generate();
        let token = FakeMintBackend::make_token("mint_a", 1000, "t1");
        let event = payment_event(&buyer, "aa:bb:cc:dd:ee:ff", &token);

        let (first, second) = tokio::join!(
            merchant.purchase_session(&event),
            merchant.purchase_session(&event)
        );
        let id_of = |outcome: IntakeOutcome| match outcome {
            IntakeOutcome::Session(e) => e.id,
            IntakeOutcome::Notice(_) => panic!("expected session on both concurrent replays"),
        };
        assert_eq!(id_of(first), id_of(second));
    }

    #[tokio::test]
    async fn untrusted_mint_is_rejected() {
        let merchant = merchant(Metric::Milliseconds);
        let buyer = Keys::generate();
        let token = FakeMintBackend::make_token("mint_evil", 1000, "t1");
        let event = payment_event(&buyer, "aa:bb:cc:dd:ee:ff", &token);

        match merchant.purchase_session(&event).await {
            IntakeOutcome::Notice(notice_event) => {
                let info = protocol::extract_notice_info(&notice_event).unwrap();
                assert_eq!(info.code, NoticeCode::MintNotAccepted);
            }
            IntakeOutcome::Session(_) => panic!("expected notice"),
        }
    }

    #[tokio::test]
    async fn insufficient_steps_is_rejected() {
        let merchant = merchant(Metric::Milliseconds);
        let buyer = Keys::generate();
        // price_per_step=1, min_purchase_steps=1, so amount 0 buys 0 steps.
        let token = FakeMintBackend::make_token("mint_a", 0, "t1");
        let event = payment_event(&buyer, "aa:bb:cc:dd:ee:ff", &token);

        match merchant.purchase_session(&event).await {
            IntakeOutcome::Notice(notice_event) => {
                let info = protocol::extract_notice_info(&notice_event).unwrap();
                assert_eq!(info.code, NoticeCode::InsufficientFunds);
            }
            IntakeOutcome::Session(_) => panic!("expected notice"),
        }
    }
}
