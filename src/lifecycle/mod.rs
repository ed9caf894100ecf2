//! The `lifecycle` module contains the per-message state machine.
//!
//! ```text
//!  INIT ──CREATE──► WAIT_WRITE_ACK ──barrier/15s──► ACTIVE ◄──────────────┐
//!                                                     │                  │
//!                      ┌──────────REPLACE─────────────┤                  │
//!                      ▼                              ├──STATUS──► WAIT_STATUS_ACK
//!               WAIT_REPLACE_ACK ──barrier/15s────────┼──────────────────┘
//!                                                     ├──DELETE──► WAIT_DELETE_ACK ──barrier/15s──► DELETED
//!                                                     └──EXPIRE / expiry timer──► EXPIRED
//! ```
//!
//! Each WAIT_* state runs a completion barrier over all child peers and a
//! forward-progress timer. `CHILD_DIED` is accepted everywhere and ignored.

pub mod fsm;
pub mod state;
pub mod timer;

pub use fsm::{MessageFsm, MessageSnapshot, PeerSnapshot, Refused, Transition};
pub use state::{Event, EventKind, MessageState};
pub use timer::TimerKind;

#[cfg(test)]
mod tests;
