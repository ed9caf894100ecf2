//! The `peer` module defines the contract between a message and its
//! delivery peers.
//!
//! Each peer is a child session owned by the message state machine as a
//! membership entry. The parent drives it with [`PeerEvent`]s and reads its
//! [`PeerState`] when checking the completion barrier; the child answers
//! asynchronously through its [`ParentLink`].

pub mod scripted;
pub mod session;

pub use scripted::{PeerController, Responder, ScriptedPeer};
pub use session::{ParentLink, PeerEvent, PeerReport, PeerSession, PeerState};
