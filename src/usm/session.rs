//! The buyer-side session model (spec.md §4.5.5): exactly three states, no
//! `Paused` — ambiguous lifecycles are intentionally disallowed.

use crate::protocol::Metric;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Expired,
    Error,
}

#[derive(Debug, Clone)]
pub struct UpstreamSession {
    pub gateway_ip: String,
    pub metric: Metric,
    pub allotment_total: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

impl UpstreamSession {
    /// Milliseconds remaining until `expires_at`, or `None` for the bytes
    /// metric (renewal there is driven by remaining bytes instead).
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at.map(|e| (e - now).num_milliseconds().max(0))
    }
}

#[derive(Default)]
pub struct UpstreamSessionMap {
    sessions: RwLock<HashMap<String, UpstreamSession>>,
}

impl UpstreamSessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, gateway_ip: &str) -> Option<UpstreamSession> {
        self.sessions.read().await.get(gateway_ip).cloned()
    }

    pub async fn insert(&self, session: UpstreamSession) {
        self.sessions
            .write()
            .await
            .insert(session.gateway_ip.clone(), session);
    }

    pub async fn remove(&self, gateway_ip: &str) {
        self.sessions.write().await.remove(gateway_ip);
    }

    pub async fn has_live_session(&self, gateway_ip: &str) -> bool {
        matches!(
            self.sessions.read().await.get(gateway_ip),
            Some(s) if s.status == SessionStatus::Active
        )
    }

    pub async fn all(&self) -> Vec<UpstreamSession> {
        self.sessions.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let map = UpstreamSessionMap::new();
        map.insert(UpstreamSession {
            gateway_ip: "10.0.0.1".into(),
            metric: Metric::Milliseconds,
            allotment_total: 1000,
            expires_at: None,
            status: SessionStatus::Active,
        })
        .await;

        assert!(map.has_live_session("10.0.0.1").await);
        map.remove("10.0.0.1").await;
        assert!(!map.has_live_session("10.0.0.1").await);
    }

    #[test]
    fn remaining_ms_never_negative() {
        let session = UpstreamSession {
            gateway_ip: "10.0.0.1".into(),
            metric: Metric::Milliseconds,
            allotment_total: 1000,
            expires_at: Some(Utc::now() - chrono::Duration::seconds(5)),
            status: SessionStatus::Active,
        };
        assert_eq!(session.remaining_ms(Utc::now()), Some(0));
    }
}
