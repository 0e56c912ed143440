//! Reservations: time-bounded holds on wallet funds at one mint, visible to
//! `available` but not `balance` (spec.md §3 "Reservation", §4.2). Mandatory
//! for any caller that checks `available` then spends — this is the
//! discipline spec.md §9's Open Questions section says the source's older
//! code lacked and the specification requires.

use crate::clock::SharedClock;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// An opaque handle returned by `reserve`, passed back to `release`/`commit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationHandle {
    pub id: Uuid,
    pub mint_url: String,
    pub amount: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    amount: u64,
    expires_at: DateTime<Utc>,
}

/// Per-mint reservation ledger. Not thread-safe on its own; the coordinator
/// wraps it in a `Mutex` alongside the per-mint exclusion lock.
#[derive(Default)]
pub(crate) struct Reservations {
    by_mint: HashMap<String, HashMap<Uuid, Entry>>,
}

impl Reservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total reserved amount for `mint_url`, after purging anything whose
    /// TTL has lapsed. Crash-proofing: a reservation that outlives its TTL
    /// releases itself the next time anyone asks, even if the reserving
    /// task never returns.
    pub fn reserved(&mut self, mint_url: &str, clock: &SharedClock) -> u64 {
        self.purge_expired(mint_url, clock);
        self.by_mint
            .get(mint_url)
            .map(|entries| entries.values().map(|e| e.amount).sum())
            .unwrap_or(0)
    }

    fn purge_expired(&mut self, mint_url: &str, clock: &SharedClock) {
        let now = clock.now();
        if let Some(entries) = self.by_mint.get_mut(mint_url) {
            entries.retain(|_, e| e.expires_at > now);
        }
    }

    pub fn insert(
        &mut self,
        mint_url: &str,
        amount: u64,
        ttl: Duration,
        clock: &SharedClock,
    ) -> ReservationHandle {
        let id = Uuid::new_v4();
        let expires_at = clock.now() + ttl;
        self.by_mint
            .entry(mint_url.to_string())
            .or_default()
            .insert(id, Entry { amount, expires_at });
        ReservationHandle {
            id,
            mint_url: mint_url.to_string(),
            amount,
        }
    }

    pub fn remove(&mut self, handle: &ReservationHandle) {
        if let Some(entries) = self.by_mint.get_mut(&handle.mint_url) {
            entries.remove(&handle.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use std::sync::Arc;

    #[test]
    fn reservation_counts_toward_reserved_until_released() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let mut reservations = Reservations::new();

        let handle = reservations.insert("mint_a", 50, Duration::seconds(30), &clock);
        assert_eq!(reservations.reserved("mint_a", &clock), 50);

        reservations.remove(&handle);
        assert_eq!(reservations.reserved("mint_a", &clock), 0);
    }

    #[test]
    fn reservation_expires_after_ttl() {
        let fixed = FixedClock::new(Utc::now());
        let clock: SharedClock = Arc::new(fixed.clone());
        let mut reservations = Reservations::new();

        reservations.insert("mint_a", 50, Duration::seconds(30), &clock);
        fixed.advance(Duration::seconds(31));

        assert_eq!(reservations.reserved("mint_a", &clock), 0);
    }
}
