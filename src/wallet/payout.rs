//! Periodic payout routine (spec.md §4.2 "payout routine", §5 "per-mint
//! payout loop"): once a mint's balance clears `min_payout_amount`, melt the
//! surplus out over lightning, split across `profit_share` recipients.
//!
//! Grounded on the teacher's `tollgate::wallet` melt path (amount-reduction
//! retry loop) and `connection_server.rs`'s use of a resolver abstraction
//! for external addressing; generalized here to resolving a lightning
//! address per profit-share recipient instead of a single owner payout.

use super::backend::MintBackend;
use super::coordinator::WalletCoordinator;
use crate::config::{AcceptedMint, ProfitShare};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const DEFAULT_PAYOUT_INTERVAL_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("wallet error: {0}")]
    Wallet(#[from] super::backend::WalletError),
    #[error("no lightning address resolvable for {0}")]
    UnresolvedRecipient(String),
}

/// Resolves a profit-share recipient's `identity_ref` (as configured) to a
/// concrete lightning address to melt funds out to.
#[async_trait]
pub trait LightningAddressResolver: Send + Sync {
    async fn resolve(&self, identity_ref: &str) -> Option<String>;
}

/// Treats `identity_ref` itself as already being a lightning address, with
/// no indirection. The expected production resolver: `profit_share` entries
/// in config name lightning addresses directly.
pub struct PassthroughResolver;

#[async_trait]
impl LightningAddressResolver for PassthroughResolver {
    async fn resolve(&self, identity_ref: &str) -> Option<String> {
        Some(identity_ref.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PayoutConfig {
    pub mint: AcceptedMint,
    pub profit_share: Vec<ProfitShare>,
}

/// Drives one mint's payout cadence. One instance per accepted mint; the
/// daemon spawns one task per instance (spec.md §5: payout loops are
/// per-mint, never contend with each other).
pub struct PayoutRunner<B: MintBackend, R: LightningAddressResolver> {
    coordinator: Arc<WalletCoordinator<B>>,
    resolver: Arc<R>,
    config: PayoutConfig,
}

impl<B: MintBackend, R: LightningAddressResolver> PayoutRunner<B, R> {
    pub fn new(
        coordinator: Arc<WalletCoordinator<B>>,
        resolver: Arc<R>,
        config: PayoutConfig,
    ) -> Self {
        Self {
            coordinator,
            resolver,
            config,
        }
    }

    pub fn mint_url(&self) -> &str {
        &self.config.mint.url
    }

    /// Run one payout cycle (spec.md §4.2): `payout = available(mint) -
    /// min_balance`; below `min_payout_amount`, skip. Otherwise hold a
    /// reservation for the full `payout` for the duration of the cycle —
    /// scenario 6 (spec.md §8) requires that a concurrent upstream purchase
    /// see an accurate `available` while this loop is melting out funds —
    /// then split `payout` proportionally across `profit_share`, skipping
    /// recipients whose address won't resolve (and logging, never failing
    /// the whole cycle for one bad recipient).
    pub async fn run_once(&self) -> Result<(), PayoutError> {
        let mint_url = &self.config.mint.url;
        let available = self.coordinator.available(mint_url).await?;
        let payout = available.saturating_sub(self.config.mint.min_balance);
        if payout < self.config.mint.min_payout_amount {
            tracing::debug!(
                mint = %mint_url,
                available,
                payout,
                threshold = self.config.mint.min_payout_amount,
                "payout below threshold; skipping cycle"
            );
            return Ok(());
        }

        let shares = if self.config.profit_share.is_empty() {
            tracing::warn!(mint = %mint_url, "no profit_share configured; payout cycle skipped");
            return Ok(());
        } else {
            &self.config.profit_share
        };

        let handle = self.coordinator.reserve(mint_url, payout, None).await?;

        for share in shares {
            let recipient_amount = (payout as f64 * share.factor).floor() as u64;
            if recipient_amount == 0 {
                continue;
            }
            let Some(address) = self.resolver.resolve(&share.identity_ref).await else {
                tracing::warn!(
                    mint = %mint_url,
                    identity_ref = %share.identity_ref,
                    "could not resolve lightning address; skipping this recipient this cycle"
                );
                continue;
            };
            match self
                .coordinator
                .melt(mint_url, recipient_amount, recipient_amount / 10, &address)
                .await
            {
                Ok(()) => tracing::info!(
                    mint = %mint_url,
                    identity_ref = %share.identity_ref,
                    amount = recipient_amount,
                    "payout melt succeeded"
                ),
                Err(e) => tracing::warn!(
                    mint = %mint_url,
                    identity_ref = %share.identity_ref,
                    error = %e,
                    "payout melt failed this cycle; balance remains for next cycle"
                ),
            }
        }

        self.coordinator.commit(&handle).await;
        Ok(())
    }
}

/// Drives one mint's [`PayoutRunner`] on a fixed cadence (spec.md §4.2:
/// "a periodic timer (per mint, default 60 s)"). The daemon spawns one
/// `PayoutLoop` per configured mint (spec.md §5: payout loops never contend
/// with each other).
pub struct PayoutLoop<B: MintBackend, R: LightningAddressResolver> {
    runner: PayoutRunner<B, R>,
    interval: StdDuration,
}

impl<B: MintBackend, R: LightningAddressResolver> PayoutLoop<B, R> {
    pub fn new(runner: PayoutRunner<B, R>, interval: Option<StdDuration>) -> Self {
        Self {
            runner,
            interval: interval.unwrap_or(StdDuration::from_secs(DEFAULT_PAYOUT_INTERVAL_SECS)),
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(mint = %self.runner.mint_url(), "payout loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.runner.run_once().await {
                        tracing::warn!(
                            mint = %self.runner.mint_url(),
                            error = %e,
                            "payout cycle failed; remainder of cycle skipped, next interval retries"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::config::AcceptedMint;
    use crate::wallet::backend::fake::FakeMintBackend;

    fn mint_config(min_payout: u64) -> AcceptedMint {
        AcceptedMint {
            url: "mint_a".into(),
            price_per_step: 1,
            price_unit: "sat".into(),
            min_purchase_steps: 1,
            min_payout_amount: min_payout,
            min_balance: 0,
            balance_tolerance_percent: 0.0,
        }
    }

    #[tokio::test]
    async fn skips_cycle_below_threshold() {
        let backend = Arc::new(FakeMintBackend::new(vec!["mint_a".into()]));
        backend.set_balance("mint_a", 10);
        let coordinator = Arc::new(WalletCoordinator::new(backend, system_clock(), true));
        let runner = PayoutRunner::new(
            coordinator.clone(),
            Arc::new(PassthroughResolver),
            PayoutConfig {
                mint: mint_config(1000),
                profit_share: vec![ProfitShare {
                    identity_ref: "owner@ln.example".into(),
                    factor: 1.0,
                }],
            },
        );
        runner.run_once().await.unwrap();
        assert_eq!(coordinator.balance("mint_a").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn melts_and_splits_across_profit_share() {
        let backend = Arc::new(FakeMintBackend::new(vec!["mint_a".into()]));
        backend.set_balance("mint_a", 1000);
        let coordinator = Arc::new(WalletCoordinator::new(backend, system_clock(), true));
        let runner = PayoutRunner::new(
            coordinator.clone(),
            Arc::new(PassthroughResolver),
            PayoutConfig {
                mint: mint_config(100),
                profit_share: vec![
                    ProfitShare {
                        identity_ref: "a@ln.example".into(),
                        factor: 0.7,
                    },
                    ProfitShare {
                        identity_ref: "b@ln.example".into(),
                        factor: 0.3,
                    },
                ],
            },
        );
        runner.run_once().await.unwrap();
        // 700 + 300 melted out of 1000, leaving 0.
        assert_eq!(coordinator.balance("mint_a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_profit_share_skips_payout() {
        let backend = Arc::new(FakeMintBackend::new(vec!["mint_a".into()]));
        backend.set_balance("mint_a", 1000);
        let coordinator = Arc::new(WalletCoordinator::new(backend, system_clock(), true));
        let runner = PayoutRunner::new(
            coordinator.clone(),
            Arc::new(PassthroughResolver),
            PayoutConfig {
                mint: mint_config(100),
                profit_share: vec![],
            },
        );
        runner.run_once().await.unwrap();
        assert_eq!(coordinator.balance("mint_a").await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn payout_reserves_min_balance() {
        // balance=10_000, min_balance=1000 -> payout should be computed
        // against 9000, not the raw balance (spec.md §4.2).
        let backend = Arc::new(FakeMintBackend::new(vec!["mint_a".into()]));
        backend.set_balance("mint_a", 10_000);
        let coordinator = Arc::new(WalletCoordinator::new(backend, system_clock(), true));
        let mut mint = mint_config(100);
        mint.min_balance = 1000;
        let runner = PayoutRunner::new(
            coordinator.clone(),
            Arc::new(PassthroughResolver),
            PayoutConfig {
                mint,
                profit_share: vec![ProfitShare {
                    identity_ref: "owner@ln.example".into(),
                    factor: 1.0,
                }],
            },
        );
        runner.run_once().await.unwrap();
        // Only the 9000 above min_balance is melted out.
        assert_eq!(coordinator.balance("mint_a").await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn payout_computed_against_available_not_raw_balance() {
        // Scenario 6 (spec.md §8): an in-flight upstream reservation must
        // not be drained by a concurrent payout cycle.
        let backend = Arc::new(FakeMintBackend::new(vec!["mint_a".into()]));
        backend.set_balance("mint_a", 10_000);
        let coordinator = Arc::new(WalletCoordinator::new(backend, system_clock(), true));
        let in_flight = coordinator.reserve("mint_a", 500, None).await.unwrap();

        let mut mint = mint_config(5000);
        mint.min_balance = 1000;
        let runner = PayoutRunner::new(
            coordinator.clone(),
            Arc::new(PassthroughResolver),
            PayoutConfig {
                mint,
                profit_share: vec![ProfitShare {
                    identity_ref: "owner@ln.example".into(),
                    factor: 1.0,
                }],
            },
        );
        runner.run_once().await.unwrap();

        // available was 9500, payout = 9500 - 1000 = 8500, leaving
        // 10_000 - 8500 = 1500 plus the untouched 500 in-flight reservation.
        assert_eq!(coordinator.balance("mint_a").await.unwrap(), 1500);
        coordinator.release(&in_flight).await;
    }
}
