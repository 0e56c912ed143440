//! `CustomerSession`: the seller-side record of one `(customer_pubkey, mac)`
//! grant (spec.md §3 "Customer Session", §4.4). Keyed and mutexed so
//! concurrent payments for the same pair serialize (spec.md §4.4.1's
//! ordering guarantee).

use crate::protocol::Metric;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub customer_pubkey: String,
    pub mac: String,
}

#[derive(Debug, Clone)]
pub struct CustomerSession {
    pub customer_pubkey: String,
    pub mac: String,
    pub metric: Metric,
    pub allotment_total: u64,
    /// Only meaningful for the time metric; `None` for bytes.
    pub expires_at: Option<DateTime<Utc>>,
    /// Consecutive Valve stats-query failures (spec.md §4.4.2 partial-failure
    /// policy); reset to 0 on any successful query.
    pub strike_count: u32,
    /// Bytes used since baseline as of the last successful enforcement tick
    /// (spec.md §4.4.2: "record consumed = used for observability"). Always
    /// 0 for the time metric, which tracks remaining allotment via
    /// `expires_at` instead.
    pub consumed: u64,
}

/// Map of live customer sessions plus the per-key serialization the intake
/// procedure relies on. Grounded on the teacher's `ConnectionServerState`
/// (an `Arc<RwLock<HashMap<..>>>` guarding request state shared across
/// concurrently handled HTTP requests).
#[derive(Default)]
pub struct SessionMap {
    sessions: RwLock<HashMap<SessionKey, CustomerSession>>,
    /// Dedup ledger: `payment_event.id` -> the session event id it produced,
    /// so replays return the identical prior result (spec.md §4.4.1 step 3).
    seen_payments: RwLock<HashMap<String, String>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &SessionKey) -> Option<CustomerSession> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn insert(&self, session: CustomerSession) {
        let key = SessionKey {
            customer_pubkey: session.customer_pubkey.clone(),
            mac: session.mac.clone(),
        };
        self.sessions.write().await.insert(key, session);
    }

    pub async fn remove(&self, key: &SessionKey) {
        self.sessions.write().await.remove(key);
    }

    pub async fn all(&self) -> Vec<CustomerSession> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn record_strike(&self, key: &SessionKey) -> u32 {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(key) {
            session.strike_count += 1;
            return session.strike_count;
        }
        0
    }

    pub async fn clear_strikes(&self, key: &SessionKey) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(key) {
            session.strike_count = 0;
        }
    }

    /// Records the byte metric's last observed usage for observability
    /// (spec.md §4.4.2).
    pub async fn record_consumed(&self, key: &SessionKey, used: u64) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(key) {
            session.consumed = used;
        }
    }

    /// Returns the prior session-event id for `payment_event_id`, if this
    /// exact payment has already been processed.
    pub async fn previous_result(&self, payment_event_id: &str) -> Option<String> {
        self.seen_payments.read().await.get(payment_event_id).cloned()
    }

    pub async fn record_result(&self, payment_event_id: &str, session_event_id: &str) {
        self.seen_payments
            .write()
            .await
            .insert(payment_event_id.to_string(), session_event_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey {
            customer_pubkey: "buyer".into(),
            mac: "aa:bb:cc:dd:ee:ff".into(),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let map = SessionMap::new();
        map.insert(CustomerSession {
            customer_pubkey: "buyer".into(),
            mac: "aa:bb:cc:dd:ee:ff".into(),
            metric: Metric::Milliseconds,
            allotment_total: 1000,
            expires_at: None,
            strike_count: 0,
            consumed: 0,
        })
        .await;

        let got = map.get(&key()).await.unwrap();
        assert_eq!(got.allotment_total, 1000);
    }

    #[tokio::test]
    async fn three_strikes_is_observable_by_caller() {
        let map = SessionMap::new();
        map.insert(CustomerSession {
            customer_pubkey: "buyer".into(),
            mac: "aa:bb:cc:dd:ee:ff".into(),
            metric: Metric::Bytes,
            allotment_total: 1000,
            expires_at: None,
            strike_count: 0,
            consumed: 0,
        })
        .await;

        assert_eq!(map.record_strike(&key()).await, 1);
        assert_eq!(map.record_strike(&key()).await, 2);
        assert_eq!(map.record_strike(&key()).await, 3);
        map.clear_strikes(&key()).await;
        assert_eq!(map.get(&key()).await.unwrap().strike_count, 0);
    }

    #[tokio::test]
    async fn record_consumed_updates_the_session() {
        let map = SessionMap::new();
        map.insert(CustomerSession {
            customer_pubkey: "buyer".into(),
            mac: "aa:bb:cc:dd:ee:ff".into(),
            metric: Metric::Bytes,
            allotment_total: 1000,
            expires_at: None,
            strike_count: 0,
            consumed: 0,
        })
        .await;

        map.record_consumed(&key(), 250).await;
        assert_eq!(map.get(&key()).await.unwrap().consumed, 250);
    }

    #[tokio::test]
    async fn payment_dedup_ledger_round_trips() {
        let map = SessionMap::new();
        assert!(map.previous_result("pay1").await.is_none());
        map.record_result("pay1", "sess1").await;
        assert_eq!(map.previous_result("pay1").await, Some("sess1".to_string()));
    }
}
