use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::{CbcMessage, MessageId};
use crate::orchestrator::command::{Envelope, WeakMailbox};
use crate::registry::InstanceId;

/// Per-peer protocol state as seen by the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerState {
    Init,
    WaitWriteAck,
    Active,
    WaitReplaceAck,
    WaitStatusAck,
    WaitDeleteAck,
    Deleted,
}

/// Lifecycle event broadcast from a message to every peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerEvent {
    Create,
    Replace,
    Status,
    Delete,
}

/// Outcome a peer reports back to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerReport {
    WriteAck,
    WriteNack,
    ReplaceAck,
    ReplaceNack,
    StatusAck,
    StatusNack,
    DeleteAck,
    DeleteNack,
}

impl PeerReport {
    /// The report a peer sends when it finishes handling `event`.
    pub fn for_event(event: PeerEvent, success: bool) -> Self {
        match (event, success) {
            (PeerEvent::Create, true) => PeerReport::WriteAck,
            (PeerEvent::Create, false) => PeerReport::WriteNack,
            (PeerEvent::Replace, true) => PeerReport::ReplaceAck,
            (PeerEvent::Replace, false) => PeerReport::ReplaceNack,
            (PeerEvent::Status, true) => PeerReport::StatusAck,
            (PeerEvent::Status, false) => PeerReport::StatusNack,
            (PeerEvent::Delete, true) => PeerReport::DeleteAck,
            (PeerEvent::Delete, false) => PeerReport::DeleteNack,
        }
    }
}

/// Handle a child uses to reach its parent message.
///
/// The link identifies the parent by id rather than by reference; every
/// report is queued and handled by the orchestrator after the current
/// event handler has finished.
#[derive(Debug, Clone)]
pub struct ParentLink {
    message_id: MessageId,
    instance: InstanceId,
    mailbox: WeakMailbox,
}

impl ParentLink {
    pub(crate) fn new(
        message_id: MessageId,
        instance: InstanceId,
        mailbox: WeakMailbox,
    ) -> Self {
        Self {
            message_id,
            instance,
            mailbox,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub(crate) fn mailbox(&self) -> &WeakMailbox {
        &self.mailbox
    }

    /// Returns `false` if the orchestrator is no longer running.
    pub fn report(&self, peer: &str, report: PeerReport) -> bool {
        self.mailbox.post(Envelope::Peer {
            instance: self.instance,
            peer: peer.to_string(),
            report,
        })
    }

    /// Tells the parent this child has terminated.
    pub fn child_died(&self, peer: &str) -> bool {
        self.mailbox.post(Envelope::ChildDied {
            instance: self.instance,
            peer: peer.to_string(),
        })
    }
}

/// A child delivery session for one peer.
///
/// Implementations own the peer protocol; the message state machine only
/// fans events out and inspects [`PeerSession::state`].
pub trait PeerSession: Send {
    fn name(&self) -> &str;

    fn state(&self) -> PeerState;

    /// Called synchronously during fan-out. Must not block: the answer is
    /// delivered later through `parent`.
    fn on_parent_event(&mut self, event: PeerEvent, message: &CbcMessage, parent: &ParentLink);

    /// Called when the parent tears the session down.
    fn terminate(&mut self) {}
}

impl fmt::Debug for dyn PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}
