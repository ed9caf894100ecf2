use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lifecycle::timer::TimerKind;
use crate::message::MessageUpdate;
use crate::operation::PendingOp;
use crate::peer::PeerReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    Init,
    WaitWriteAck,
    Active,
    WaitReplaceAck,
    WaitStatusAck,
    WaitDeleteAck,
    Deleted,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Create,
    Replace,
    Status,
    Delete,
    Expire,
    WriteAck,
    WriteNack,
    ReplaceAck,
    ReplaceNack,
    StatusAck,
    StatusNack,
    DeleteAck,
    DeleteNack,
    ChildDied,
}

/// Input to [`MessageFsm::dispatch`](crate::lifecycle::MessageFsm::dispatch).
///
/// Requests carry the pending operation that the state machine holds until
/// the step completes.
#[derive(Debug)]
pub enum Event {
    Create(PendingOp),
    Replace(PendingOp, MessageUpdate),
    Status(PendingOp),
    Delete(PendingOp),
    Expire,
    Peer(PeerReport),
    ChildDied,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Create(_) => EventKind::Create,
            Event::Replace(..) => EventKind::Replace,
            Event::Status(_) => EventKind::Status,
            Event::Delete(_) => EventKind::Delete,
            Event::Expire => EventKind::Expire,
            Event::Peer(report) => EventKind::from(*report),
            Event::ChildDied => EventKind::ChildDied,
        }
    }

    /// Gives back the operation a refused request was carrying.
    pub fn into_op(self) -> Option<PendingOp> {
        match self {
            Event::Create(op) | Event::Replace(op, _) | Event::Status(op) | Event::Delete(op) => {
                Some(op)
            }
            _ => None,
        }
    }
}

impl From<PeerReport> for EventKind {
    fn from(report: PeerReport) -> Self {
        match report {
            PeerReport::WriteAck => EventKind::WriteAck,
            PeerReport::WriteNack => EventKind::WriteNack,
            PeerReport::ReplaceAck => EventKind::ReplaceAck,
            PeerReport::ReplaceNack => EventKind::ReplaceNack,
            PeerReport::StatusAck => EventKind::StatusAck,
            PeerReport::StatusNack => EventKind::StatusNack,
            PeerReport::DeleteAck => EventKind::DeleteAck,
            PeerReport::DeleteNack => EventKind::DeleteNack,
        }
    }
}

impl MessageState {
    pub fn name(self) -> &'static str {
        match self {
            MessageState::Init => "INIT",
            MessageState::WaitWriteAck => "WAIT_WRITE_ACK",
            MessageState::Active => "ACTIVE",
            MessageState::WaitReplaceAck => "WAIT_REPLACE_ACK",
            MessageState::WaitStatusAck => "WAIT_STATUS_ACK",
            MessageState::WaitDeleteAck => "WAIT_DELETE_ACK",
            MessageState::Deleted => "DELETED",
            MessageState::Expired => "EXPIRED",
        }
    }

    /// Events the state handles. `CHILD_DIED` is accepted in every state.
    pub fn accepts(self, event: EventKind) -> bool {
        use EventKind as E;
        if event == E::ChildDied {
            return true;
        }
        match self {
            MessageState::Init => matches!(event, E::Create),
            MessageState::WaitWriteAck => matches!(event, E::WriteAck | E::WriteNack),
            MessageState::Active => {
                matches!(event, E::Replace | E::Status | E::Delete | E::Expire)
            }
            MessageState::WaitReplaceAck => matches!(event, E::ReplaceAck | E::ReplaceNack),
            MessageState::WaitStatusAck => matches!(event, E::StatusAck | E::StatusNack),
            MessageState::WaitDeleteAck => matches!(event, E::DeleteAck | E::DeleteNack),
            MessageState::Deleted | MessageState::Expired => false,
        }
    }

    /// Permitted successor states.
    pub fn allows(self, next: MessageState) -> bool {
        use MessageState as S;
        match self {
            S::Init => next == S::WaitWriteAck,
            S::WaitWriteAck | S::WaitReplaceAck | S::WaitStatusAck => next == S::Active,
            S::Active => matches!(
                next,
                S::Active | S::WaitReplaceAck | S::WaitStatusAck | S::WaitDeleteAck | S::Expired
            ),
            S::WaitDeleteAck => next == S::Deleted,
            S::Deleted | S::Expired => false,
        }
    }

    /// True while an administrative operation is in flight.
    pub fn is_waiting(self) -> bool {
        self.ack_timer().is_some()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MessageState::Deleted | MessageState::Expired)
    }

    /// Forward-progress timer armed on entry to a wait state.
    pub fn ack_timer(self) -> Option<TimerKind> {
        match self {
            MessageState::WaitWriteAck => Some(TimerKind::WaitWriteAck),
            MessageState::WaitReplaceAck => Some(TimerKind::WaitReplaceAck),
            MessageState::WaitStatusAck => Some(TimerKind::WaitStatusAck),
            MessageState::WaitDeleteAck => Some(TimerKind::WaitDeleteAck),
            _ => None,
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Create => "CREATE",
            EventKind::Replace => "REPLACE",
            EventKind::Status => "STATUS",
            EventKind::Delete => "DELETE",
            EventKind::Expire => "EXPIRE",
            EventKind::WriteAck => "WRITE_ACK",
            EventKind::WriteNack => "WRITE_NACK",
            EventKind::ReplaceAck => "REPLACE_ACK",
            EventKind::ReplaceNack => "REPLACE_NACK",
            EventKind::StatusAck => "STATUS_ACK",
            EventKind::StatusNack => "STATUS_NACK",
            EventKind::DeleteAck => "DELETE_ACK",
            EventKind::DeleteNack => "DELETE_NACK",
            EventKind::ChildDied => "CHILD_DIED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
