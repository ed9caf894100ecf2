//! # cbcast
//!
//! `cbcast` is the message-lifecycle orchestrator of a Cell Broadcast Centre.
//! It drives each broadcast message through create, replace, status and
//! delete across any number of delivery peers, waits until every peer has
//! answered (or a timer forces progress), and reports one result back to
//! the requester.
//!
//! ## Core Modules
//!
//! - `lifecycle`: the per-message state machine with its completion barrier and timers.
//! - `registry`: live and retired message instances.
//! - `orchestrator`: the single worker that serializes every input, and its handle.
//! - `operation`: pending operation handles released exactly once per step.
//! - `peer`: the child delivery session contract and an in-process scripted peer.
//! - `message`: the broadcast payload and its parameters.
//! - `persistence`: the `sled` archive of retired messages.
//! - `config`: configuration loading.
//! - `utils`: error type and logging bootstrap.

pub mod config;
pub mod lifecycle;
pub mod message;
pub mod operation;
pub mod orchestrator;
pub mod peer;
pub mod persistence;
pub mod registry;
pub mod utils;

pub use lifecycle::{MessageSnapshot, MessageState};
pub use message::{CbcMessage, MessageId, WARNING_PERIOD_NEVER};
pub use operation::{OpResult, OpWaiter, PendingOp};
pub use orchestrator::{Orchestrator, OrchestratorHandle};
pub use peer::{ParentLink, PeerSession, PeerState};
pub use registry::Registry;
pub use utils::{LifecycleError, Result};
