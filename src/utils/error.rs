//! Error types surfaced to callers of the orchestrator.
//!
//! Invariant violations (attaching a second pending operation, tearing down
//! a message that still has peers) are not represented here: they abort
//! via assertions inside the state machine. Everything in [`LifecycleError`]
//! is recoverable and reported back to whoever issued the request.

use thiserror::Error;

use crate::lifecycle::{EventKind, MessageState};
use crate::message::MessageId;

pub type Result<T> = std::result::Result<T, LifecycleError>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A create request named an id that is already live.
    #[error("message_id {id} already exists")]
    AlreadyExists { id: MessageId },

    #[error("message_id {id} not found")]
    NotFound { id: MessageId },

    /// Another administrative operation is still in flight for this message.
    #[error("message_id {id} is busy in state {state}")]
    Busy { id: MessageId, state: MessageState },

    #[error("message_id {id} cannot accept {event} in state {state}")]
    InvalidState {
        id: MessageId,
        state: MessageState,
        event: EventKind,
    },

    #[error("peer {peer} already attached to message_id {id}")]
    PeerExists { id: MessageId, peer: String },

    /// The message was torn down while the operation was pending.
    #[error("message_id {id} was freed")]
    Freed { id: MessageId },

    #[error("orchestrator is shut down")]
    Shutdown,

    #[error("archive error: {0}")]
    Archive(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl LifecycleError {
    /// Short snake_case label for log fields.
    pub fn as_label(&self) -> &'static str {
        match self {
            LifecycleError::AlreadyExists { .. } => "already_exists",
            LifecycleError::NotFound { .. } => "not_found",
            LifecycleError::Busy { .. } => "busy",
            LifecycleError::InvalidState { .. } => "invalid_state",
            LifecycleError::PeerExists { .. } => "peer_exists",
            LifecycleError::Freed { .. } => "freed",
            LifecycleError::Shutdown => "shutdown",
            LifecycleError::Archive(_) => "archive",
            LifecycleError::Serialize(_) => "serialize",
            LifecycleError::Config(_) => "config",
        }
    }
}
