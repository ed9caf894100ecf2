//! The `operation` module models an outstanding administrative request.
//!
//! A [`PendingOp`] is handed to the state machine together with the request
//! event; the caller keeps the matching [`OpWaiter`]. The op is released
//! exactly once, either with a result or a rejection.

pub mod pending;

pub use pending::{OpResult, OpWaiter, PendingOp};
