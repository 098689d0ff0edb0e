//! `agv-kernel` – Command Safety Rules
//!
//! The pure decision layer of the AGV link.  Nothing in here owns a socket,
//! a thread or a lock; the stateful runtime in `agv-net` calls into these
//! types while holding its shared state.
//!
//! # Modules
//!
//! - [`priority`] – [`classify`][priority::classify]: maps raw command text
//!   to a [`Priority`][agv_types::Priority] and an [`EmergencyAction`].
//! - [`gate`] – [`EmergencyGate`][gate::EmergencyGate]: the single decision
//!   point that says whether a classified command may reach the motion core
//!   while the emergency flag is set.
//! - [`emergency`] – [`EmergencyLatch`][emergency::EmergencyLatch]: the
//!   two-state emergency machine reporting distinct transitions.
//! - [`session`] – [`SessionAuthenticator`][session::SessionAuthenticator]:
//!   single-admin bearer tokens with login throttling.
//! - [`watchdog`] – [`LoopWatchdog`][watchdog::LoopWatchdog]: lock-free
//!   heartbeat used to detect a stalled service loop.

pub mod emergency;
pub mod gate;
pub mod priority;
pub mod session;
pub mod watchdog;

pub use emergency::{EmergencyLatch, Transition};
pub use gate::{EmergencyGate, Verdict};
pub use priority::{Classification, EmergencyAction, classify};
pub use session::{LoginOutcome, Session, SessionAuthenticator};
pub use watchdog::LoopWatchdog;
