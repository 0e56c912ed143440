//! Merchant (spec.md §4.4): turns inbound payment events into session
//! events and enforces consumption. Grounded on the teacher's
//! `ConnectionServerState`-style request handling, generalized from
//! connection approval into payment intake, plus a new enforcement loop the
//! teacher (a buyer-only app) never needed.

mod enforcement;
mod intake;
mod session;

pub use enforcement::EnforcementLoop;
pub use intake::{IntakeOutcome, Merchant};
pub use session::{CustomerSession, SessionKey, SessionMap};
