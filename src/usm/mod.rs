//! Upstream Session Manager (spec.md §4.5): owns this gateway's lifecycle
//! as a *buyer* of upstream access. Grounded on the teacher's
//! `tollgate::service::TollGateService` (the nearest in-corpus "detect a
//! gateway, fetch its advertisement, pay, hold a session" state machine),
//! generalized from a UI-driven one-shot flow into the unified,
//! poll/renewal-driven `attempt_purchase` procedure spec.md names.

pub mod gateway;
pub mod purchase;
pub mod session;
pub mod transport;

mod poll;

pub use gateway::{GatewayMap, KnownGateway};
pub use poll::PollLoop;
pub use purchase::{PurchaseAttempter, PurchaseOutcome, PurchaseReason};
pub use session::{SessionStatus, UpstreamSession, UpstreamSessionMap};
pub use transport::{GatewayTransport, TransportError};
