//! The Cashu mint backend capability (spec.md §6 "Wallet external binding").
//!
//! `MintBackend` is the trait the production implementation wraps around
//! `cdk::wallet::Wallet` + `cdk_sqlite::wallet::WalletSqliteDatabase`,
//! grounded directly on the teacher's `tollgate::wallet::TollGateWallet`
//! (per-mint wallet map, sqlite path derivation, mnemonic-derived seed). No
//! such production implementation ships in this repository (mint RPC
//! wiring is straightforward glue over `cdk`, not an architectural lesson);
//! `FakeMintBackend` in the test module is what the rest of the crate is
//! exercised against.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WalletError {
    #[error("mint {0} is not trusted and untrusted swaps are disabled")]
    UntrustedMint(String),

    #[error("token already spent")]
    TokenAlreadySpent,

    #[error("token is malformed: {0}")]
    MalformedToken(String),

    #[error("mint rpc error: {0}")]
    MintRpc(String),

    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },

    #[error("overpayment {actual} exceeds allowed envelope for target {target}")]
    OverpaymentExceeded { target: u64, actual: u64 },

    #[error("melt cost exceeded max_cost after exhausting retries")]
    MeltCostExceeded,

    #[error("unknown mint: {0}")]
    UnknownMint(String),

    #[error("lightning address resolution failed for {0}")]
    AddressResolution(String),
}

/// Outcome of successfully redeeming a token at its own (trusted) mint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemedToken {
    pub mint_url: String,
    pub amount: u64,
}

/// Outcome of constructing a transferable token via `send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentToken {
    pub token: String,
    /// The amount actually bound into the token, which may exceed the
    /// requested amount because of denomination constraints.
    pub amount: u64,
}

/// A quoted on-chain/lightning cost for melting `amount` at `mint_url`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeltQuote {
    pub quote_id_hash: u64,
    pub cost: u64,
}

/// Capability interface over a Cashu mint backend. Every mutating method is
/// expected to be called with the coordinator's per-mint exclusion already
/// held (spec.md §5); the trait itself makes no concurrency promises.
#[async_trait]
pub trait MintBackend: Send + Sync {
    /// Mints this backend will accept tokens from directly.
    fn trusted_mints(&self) -> Vec<String>;

    /// Cheap, local decode of which mint issued `token`, without redeeming
    /// it. Used to route `receive` before acquiring a lock.
    fn peek_mint_url(&self, token: &str) -> Result<String, WalletError>;

    /// Sum of unspent proofs for `mint_url`.
    async fn balance(&self, mint_url: &str) -> Result<u64, WalletError>;

    /// Redeem a token whose mint is already trusted.
    async fn redeem(&self, token: &str) -> Result<RedeemedToken, WalletError>;

    /// Swap a token from an untrusted mint into `trusted_mint`'s proof set.
    async fn swap_to_trusted(
        &self,
        token: &str,
        trusted_mint: &str,
    ) -> Result<RedeemedToken, WalletError>;

    /// Construct a transferable token worth at least `amount` at
    /// `mint_url`. The caller (the coordinator) is responsible for deciding
    /// whether the resulting `SentToken::amount` overpays by more than its
    /// policy allows and, if so, undoing the spend via [`credit_back`].
    ///
    /// [`credit_back`]: MintBackend::credit_back
    async fn send(&self, mint_url: &str, amount: u64) -> Result<SentToken, WalletError>;

    /// Reverse a `send` whose resulting token is being discarded rather than
    /// handed out, restoring `amount` to `mint_url`'s balance. Used only to
    /// undo an overpayment the coordinator's envelope check rejected.
    async fn credit_back(&self, mint_url: &str, amount: u64) -> Result<(), WalletError>;

    /// Quote the cost of melting `amount` at `mint_url` out to
    /// `lightning_address`, without executing it.
    async fn quote_melt(
        &self,
        mint_url: &str,
        amount: u64,
        lightning_address: &str,
    ) -> Result<MeltQuote, WalletError>;

    /// Execute a previously quoted melt.
    async fn execute_melt(&self, mint_url: &str, quote: MeltQuote) -> Result<(), WalletError>;
}

/// In-memory `MintBackend` used by unit and scenario tests, and by the
/// daemon's `--fake-wallet` development mode (no real mint RPC). Kept
/// unconditionally compiled, not `#[cfg(test)]`, so integration tests under
/// `tests/` can use it too — the same role the spec assigns to the Valve's
/// in-memory fakes (§6, §10.9).
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// An in-memory `MintBackend` for tests: tracks a balance per mint, a
    /// set of spent token ids, and records melts so scenario tests can
    /// assert on payout behavior.
    pub struct FakeMintBackend {
        trusted: Vec<String>,
        balances: Mutex<HashMap<String, u64>>,
        spent_tokens: Mutex<std::collections::HashSet<String>>,
        pub melts: Mutex<Vec<(String, u64, String)>>,
        overpay_by: u64,
    }

    impl FakeMintBackend {
        pub fn new(trusted: Vec<String>) -> Self {
            Self {
                trusted,
                balances: Mutex::new(HashMap::new()),
                spent_tokens: Mutex::new(std::collections::HashSet::new()),
                melts: Mutex::new(Vec::new()),
                overpay_by: 0,
            }
        }

        pub fn with_overpay(mut self, overpay_by: u64) -> Self {
            self.overpay_by = overpay_by;
            self
        }

        pub fn set_balance(&self, mint_url: &str, amount: u64) {
            self.balances
                .lock()
                .unwrap()
                .insert(mint_url.to_string(), amount);
        }

        pub fn mark_spent(&self, token: &str) {
            if let Ok((mint, _amount, id)) = Self::decode(token) {
                self.spent_tokens.lock().unwrap().insert(format!("{mint}:{id}"));
            }
        }

        fn credit(&self, mint_url: &str, amount: u64) {
            *self
                .balances
                .lock()
                .unwrap()
                .entry(mint_url.to_string())
                .or_insert(0) += amount;
        }

        fn debit(&self, mint_url: &str, amount: u64) -> Result<(), WalletError> {
            let mut balances = self.balances.lock().unwrap();
            let bal = balances.entry(mint_url.to_string()).or_insert(0);
            if *bal < amount {
                return Err(WalletError::InsufficientFunds {
                    requested: amount,
                    available: *bal,
                });
            }
            *bal -= amount;
            Ok(())
        }

        /// Fake tokens are of the form "<mint_url>|<amount>|<id>".
        fn decode(token: &str) -> Result<(String, u64, String), WalletError> {
            let mut parts = token.splitn(3, '|');
            let mint = parts
                .next()
                .ok_or_else(|| WalletError::MalformedToken(token.to_string()))?;
            let amount: u64 = parts
                .next()
                .ok_or_else(|| WalletError::MalformedToken(token.to_string()))?
                .parse()
                .map_err(|_| WalletError::MalformedToken(token.to_string()))?;
            let id = parts
                .next()
                .unwrap_or("0")
                .to_string();
            Ok((mint.to_string(), amount, id))
        }

        pub fn make_token(mint_url: &str, amount: u64, id: &str) -> String {
            format!("{mint_url}|{amount}|{id}")
        }
    }

    #[async_trait]
    impl MintBackend for FakeMintBackend {
        fn trusted_mints(&self) -> Vec<String> {
            self.trusted.clone()
        }

        fn peek_mint_url(&self, token: &str) -> Result<String, WalletError> {
            Self::decode(token).map(|(mint, _, _)| mint)
        }

        async fn balance(&self, mint_url: &str) -> Result<u64, WalletError> {
            Ok(*self.balances.lock().unwrap().get(mint_url).unwrap_or(&0))
        }

        async fn redeem(&self, token: &str) -> Result<RedeemedToken, WalletError> {
            let (mint, amount, id) = Self::decode(token)?;
            let token_key = format!("{mint}:{id}");
            let mut spent = self.spent_tokens.lock().unwrap();
            if spent.contains(&token_key) {
                return Err(WalletError::TokenAlreadySpent);
            }
            spent.insert(token_key);
            drop(spent);
            self.credit(&mint, amount);
            Ok(RedeemedToken {
                mint_url: mint,
                amount,
            })
        }

        async fn swap_to_trusted(
            &self,
            token: &str,
            trusted_mint: &str,
        ) -> Result<RedeemedToken, WalletError> {
            let (_origin_mint, amount, _id) = Self::decode(token)?;
            // Swapping costs nothing in the fake; real swaps may incur mint
            // fees, which is why overpayment exists at the `send` boundary.
            self.credit(trusted_mint, amount);
            Ok(RedeemedToken {
                mint_url: trusted_mint.to_string(),
                amount,
            })
        }

        async fn send(&self, mint_url: &str, amount: u64) -> Result<SentToken, WalletError> {
            let actual = amount + self.overpay_by;
            self.debit(mint_url, actual)?;
            Ok(SentToken {
                token: Self::make_token(mint_url, actual, "sent"),
                amount: actual,
            })
        }

        async fn quote_melt(
            &self,
            _mint_url: &str,
            amount: u64,
            _lightning_address: &str,
        ) -> Result<MeltQuote, WalletError> {
            // Fixed 2% fee model, deterministic for tests.
            let cost = amount / 50;
            Ok(MeltQuote {
                quote_id_hash: amount,
                cost,
            })
        }

        async fn execute_melt(&self, mint_url: &str, quote: MeltQuote) -> Result<(), WalletError> {
            self.debit(mint_url, quote.quote_id_hash)?;
            Ok(())
        }

        async fn credit_back(&self, mint_url: &str, amount: u64) -> Result<(), WalletError> {
            self.credit(mint_url, amount);
            Ok(())
        }
    }
}
