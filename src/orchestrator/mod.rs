//! The `orchestrator` module runs message state machines.
//!
//! [`Orchestrator`] is the single worker that owns the registry and
//! processes one queued input at a time; [`OrchestratorHandle`] is the
//! cloneable sender used by request front ends and peers.

pub(crate) mod command;
pub mod engine;
pub mod handle;

pub use engine::Orchestrator;
pub use handle::OrchestratorHandle;
