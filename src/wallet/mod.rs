//! Wallet Coordinator (spec.md §4.2): the single mediator of all value
//! movement — downstream receive, upstream send-with-overpayment,
//! reservation-protected balance queries, periodic lightning payouts.
//!
//! Grounded on the teacher's `tollgate::wallet::TollGateWallet` (per-mint
//! `HashMap<String, Wallet>`, sqlite-backed proof storage, mnemonic-derived
//! seed), generalized: the teacher only ever *sent* payments (buyer side);
//! this crate also needs to *receive* downstream payments (seller side) and
//! enforce the reservation discipline spec.md §9 says the source's older
//! code lacked.

pub mod backend;
mod coordinator;
mod payout;
mod reservation;

pub use backend::{MeltQuote, MintBackend, RedeemedToken, SentToken, WalletError};
pub use coordinator::{OverpaymentPolicy, WalletCoordinator};
pub use payout::{
    LightningAddressResolver, PassthroughResolver, PayoutConfig, PayoutLoop, PayoutRunner,
};
pub use reservation::ReservationHandle;
