//! The Wallet Coordinator: mediates every value movement through a single
//! per-mint exclusion lock plus the reservation ledger (spec.md §4.2, §5).

use super::backend::{MintBackend, RedeemedToken, SentToken, WalletError};
use super::reservation::{ReservationHandle, Reservations};
use crate::clock::SharedClock;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

const DEFAULT_RESERVATION_TTL_SECS: i64 = 30;
const MAX_MELT_ATTEMPTS: u32 = 10;
const MELT_BACKOFF_PCT: u64 = 95;

/// Caps how much a `send` may overpay the requested amount, to absorb
/// Cashu denomination gaps (spec.md §4.2).
#[derive(Debug, Clone, Copy, Default)]
pub struct OverpaymentPolicy {
    pub overpayment_pct: f64,
    pub overpayment_abs: u64,
}

impl OverpaymentPolicy {
    fn max_allowed(&self, requested: u64) -> u64 {
        let pct_allowance = (requested as f64 * self.overpayment_pct / 100.0).floor() as u64;
        pct_allowance.max(self.overpayment_abs)
    }
}

struct MintState {
    lock: AsyncMutex<()>,
}

/// The single mediator of all value movement. One instance per gateway,
/// shared (behind an `Arc`) with Merchant (receive) and USM (send/reserve),
/// and with the payout loop (melt).
pub struct WalletCoordinator<B: MintBackend> {
    backend: Arc<B>,
    clock: SharedClock,
    allow_swap_untrusted: bool,
    mints: AsyncMutex<HashMap<String, Arc<MintState>>>,
    reservations: AsyncMutex<Reservations>,
}

impl<B: MintBackend> WalletCoordinator<B> {
    pub fn new(backend: Arc<B>, clock: SharedClock, allow_swap_untrusted: bool) -> Self {
        Self {
            backend,
            clock,
            allow_swap_untrusted,
            mints: AsyncMutex::new(HashMap::new()),
            reservations: AsyncMutex::new(Reservations::new()),
        }
    }

    async fn mint_state(&self, mint_url: &str) -> Arc<MintState> {
        let mut mints = self.mints.lock().await;
        mints
            .entry(mint_url.to_string())
            .or_insert_with(|| {
                Arc::new(MintState {
                    lock: AsyncMutex::new(()),
                })
            })
            .clone()
    }

    /// Read-only: unspent proofs for `mint_url`. Uses a consistent snapshot
    /// (no lock needed beyond the backend's own internal consistency).
    pub async fn balance(&self, mint_url: &str) -> Result<u64, WalletError> {
        self.backend.balance(mint_url).await
    }

    /// `balance - reserved`, the figure callers must check before
    /// committing to a payment (spec.md §4.2, invariant §8: `Σ reserved(m) ≤
    /// balance(m)`).
    pub async fn available(&self, mint_url: &str) -> Result<u64, WalletError> {
        let balance = self.backend.balance(mint_url).await?;
        let mut reservations = self.reservations.lock().await;
        let reserved = reservations.reserved(mint_url, &self.clock);
        Ok(balance.saturating_sub(reserved))
    }

    /// Accept a downstream payment token. If its mint is trusted, redeem it
    /// directly; if untrusted and swaps are allowed, swap into a trusted
    /// mint; else reject (spec.md §4.2).
    pub async fn receive(&self, token: &str) -> Result<RedeemedToken, WalletError> {
        let origin_mint = self.backend.peek_mint_url(token)?;
        let trusted = self.backend.trusted_mints();

        if trusted.iter().any(|m| m == &origin_mint) {
            let state = self.mint_state(&origin_mint).await;
            let _guard = state.lock.lock().await;
            return self.backend.redeem(token).await;
        }

        if !self.allow_swap_untrusted {
            return Err(WalletError::UntrustedMint(origin_mint));
        }

        let target = trusted
            .first()
            .ok_or_else(|| WalletError::UntrustedMint(origin_mint.clone()))?
            .clone();
        let state = self.mint_state(&target).await;
        let _guard = state.lock.lock().await;
        self.backend.swap_to_trusted(token, &target).await
    }

    /// Hold `amount` at `mint_url` for `ttl` (default 30s), rejecting the
    /// reservation outright if it would push `Σ reserved` above `balance` —
    /// this is what makes the invariant in spec.md §8 structurally true
    /// rather than merely hoped-for.
    pub async fn reserve(
        &self,
        mint_url: &str,
        amount: u64,
        ttl: Option<Duration>,
    ) -> Result<ReservationHandle, WalletError> {
        let ttl = ttl.unwrap_or_else(|| Duration::seconds(DEFAULT_RESERVATION_TTL_SECS));
        let balance = self.backend.balance(mint_url).await?;

        let mut reservations = self.reservations.lock().await;
        let already_reserved = reservations.reserved(mint_url, &self.clock);
        if already_reserved + amount > balance {
            return Err(WalletError::InsufficientFunds {
                requested: amount,
                available: balance.saturating_sub(already_reserved),
            });
        }
        Ok(reservations.insert(mint_url, amount, ttl, &self.clock))
    }

    /// Release a reservation without having spent it.
    pub async fn release(&self, handle: &ReservationHandle) {
        let mut reservations = self.reservations.lock().await;
        reservations.remove(handle);
    }

    /// Finalize a reservation after the matching `send`/`melt` has already
    /// happened. Equivalent, in wallet state, to never having reserved at
    /// all (spec.md §8's round-trip law).
    pub async fn commit(&self, handle: &ReservationHandle) {
        let mut reservations = self.reservations.lock().await;
        reservations.remove(handle);
    }

    /// Construct a transferable token worth `amount`, allowing overpayment
    /// only within `policy`'s envelope.
    pub async fn send(
        &self,
        mint_url: &str,
        amount: u64,
        policy: OverpaymentPolicy,
    ) -> Result<SentToken, WalletError> {
        let state = self.mint_state(mint_url).await;
        let _guard = state.lock.lock().await;

        let sent = self.backend.send(mint_url, amount).await?;
        let overpayment = sent.amount.saturating_sub(amount);
        let allowed = policy.max_allowed(amount);
        if overpayment > allowed {
            // `send` already debited `sent.amount`; since the token is being
            // discarded rather than handed to anyone, credit it back so the
            // rejected attempt leaves the balance untouched.
            if let Err(e) = self.backend.credit_back(mint_url, sent.amount).await {
                tracing::error!(
                    mint = %mint_url,
                    amount = sent.amount,
                    error = %e,
                    "failed to credit back a rejected overpayment; balance is now short"
                );
            }
            return Err(WalletError::OverpaymentExceeded {
                target: amount,
                actual: sent.amount,
            });
        }
        if overpayment > 0 {
            tracing::info!(
                mint = %mint_url,
                overpayment,
                "send overpaid within allowed envelope; treating as donation"
            );
        }
        Ok(sent)
    }

    /// Adaptive melt: try `amount`; if the quoted cost exceeds `max_cost`,
    /// shrink the attempt by 5% and retry, up to 10 attempts (spec.md
    /// §4.2).
    pub async fn melt(
        &self,
        mint_url: &str,
        amount: u64,
        max_cost: u64,
        lightning_address: &str,
    ) -> Result<(), WalletError> {
        let state = self.mint_state(mint_url).await;
        let _guard = state.lock.lock().await;

        let mut attempt = amount;
        for _ in 0..MAX_MELT_ATTEMPTS {
            if attempt == 0 {
                break;
            }
            let quote = self
                .backend
                .quote_melt(mint_url, attempt, lightning_address)
                .await?;
            if quote.cost <= max_cost {
                return self.backend.execute_melt(mint_url, quote).await;
            }
            attempt = attempt * MELT_BACKOFF_PCT / 100;
        }
        Err(WalletError::MeltCostExceeded)
    }

    pub(crate) fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub(crate) fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::wallet::backend::fake::FakeMintBackend;

    fn coordinator(backend: FakeMintBackend) -> WalletCoordinator<FakeMintBackend> {
        WalletCoordinator::new(Arc::new(backend), system_clock(), true)
    }

    #[tokio::test]
    async fn receive_trusted_mint_credits_balance() {
        let backend = FakeMintBackend::new(vec!["mint_a".into()]);
        let coord = coordinator(backend);
        let token = FakeMintBackend::make_token("mint_a", 5, "tok1");

        let redeemed = coord.receive(&token).await.unwrap();
        assert_eq!(redeemed.amount, 5);
        assert_eq!(coord.balance("mint_a").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn receive_rejects_untrusted_mint_without_swap() {
        let backend = FakeMintBackend::new(vec!["mint_a".into()]);
        let coord = WalletCoordinator::new(Arc::new(backend), system_clock(), false);
        let token = FakeMintBackend::make_token("mint_evil", 5, "tok1");

        assert_eq!(
            coord.receive(&token).await,
            Err(WalletError::UntrustedMint("mint_evil".into()))
        );
    }

    #[tokio::test]
    async fn receive_replay_of_spent_token_is_rejected() {
        let backend = FakeMintBackend::new(vec!["mint_a".into()]);
        let coord = coordinator(backend);
        let token = FakeMintBackend::make_token("mint_a", 5, "tok1");

        coord.receive(&token).await.unwrap();
        // The fake backend tracks spend by (mint, id); a second redeem of
        // the identical token string is a replay.
        let result = coord.receive(&token).await;
        assert_eq!(result, Err(WalletError::TokenAlreadySpent));
    }

    #[tokio::test]
    async fn reserve_rejects_when_it_would_exceed_balance() {
        let backend = FakeMintBackend::new(vec!["mint_a".into()]);
        backend.set_balance("mint_a", 100);
        let coord = coordinator(backend);

        coord.reserve("mint_a", 60, None).await.unwrap();
        let result = coord.reserve("mint_a", 50, None).await;
        assert!(matches!(result, Err(WalletError::InsufficientFunds { .. })));
    }

    #[tokio::test]
    async fn available_reflects_reservation() {
        let backend = FakeMintBackend::new(vec!["mint_a".into()]);
        backend.set_balance("mint_a", 100);
        let coord = coordinator(backend);

        let handle = coord.reserve("mint_a", 40, None).await.unwrap();
        assert_eq!(coord.available("mint_a").await.unwrap(), 60);

        coord.release(&handle).await;
        assert_eq!(coord.available("mint_a").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn reserve_then_commit_equals_spending_without_reserving() {
        let backend = FakeMintBackend::new(vec!["mint_a".into()]);
        backend.set_balance("mint_a", 100);
        let coord = coordinator(backend);

        let handle = coord.reserve("mint_a", 30, None).await.unwrap();
        coord.commit(&handle).await;

        // The reservation left no residue: available == balance again,
        // mirroring the spec's round-trip law.
        assert_eq!(coord.available("mint_a").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn send_overpayment_within_envelope_is_allowed() {
        let backend = FakeMintBackend::new(vec!["mint_a".into()]).with_overpay(2);
        backend.set_balance("mint_a", 100);
        let coord = coordinator(backend);

        let sent = coord
            .send(
                "mint_a",
                10,
                OverpaymentPolicy {
                    overpayment_pct: 0.0,
                    overpayment_abs: 5,
                },
            )
            .await
            .unwrap();
        assert_eq!(sent.amount, 12);
    }

    #[tokio::test]
    async fn send_overpayment_outside_envelope_is_rejected() {
        let backend = FakeMintBackend::new(vec!["mint_a".into()]).with_overpay(10);
        backend.set_balance("mint_a", 100);
        let coord = coordinator(backend);

        let result = coord
            .send(
                "mint_a",
                10,
                OverpaymentPolicy {
                    overpayment_pct: 0.0,
                    overpayment_abs: 1,
                },
            )
            .await;
        assert!(matches!(result, Err(WalletError::OverpaymentExceeded { .. })));
    }

    #[tokio::test]
    async fn rejected_overpayment_credits_the_debit_back() {
        let backend = FakeMintBackend::new(vec!["mint_a".into()]).with_overpay(10);
        backend.set_balance("mint_a", 100);
        let coord = coordinator(backend);

        let result = coord
            .send(
                "mint_a",
                10,
                OverpaymentPolicy {
                    overpayment_pct: 0.0,
                    overpayment_abs: 1,
                },
            )
            .await;
        assert!(matches!(result, Err(WalletError::OverpaymentExceeded { .. })));
        // The failed send must leave the balance exactly as it found it.
        assert_eq!(coord.balance("mint_a").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn melt_reduces_amount_until_quoted_cost_fits() {
        // Fake backend quotes cost = amount / 50 (2%); with max_cost=1 and
        // amount=100 the first quote (2) is too high, forcing a 5%
        // reduction to 95, quote 1 (95/50 = 1) which fits.
        let backend = FakeMintBackend::new(vec!["mint_a".into()]);
        backend.set_balance("mint_a", 1000);
        let coord = coordinator(backend);

        let result = coord.melt("mint_a", 100, 1, "buyer@ln.example").await;
        assert!(result.is_ok());
    }

    #[test]
    fn overpayment_policy_takes_the_larger_allowance() {
        let policy = OverpaymentPolicy {
            overpayment_pct: 10.0,
            overpayment_abs: 3,
        };
        assert_eq!(policy.max_allowed(100), 10);
        assert_eq!(policy.max_allowed(10), 3);
    }

}
