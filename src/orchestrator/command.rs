//! Envelopes consumed by the orchestrator worker.
//!
//! Every input (administrative request, peer report, timer firing, query)
//! travels through one queue so that a message's state only ever changes
//! inside a single run-to-completion handler.

use tokio::sync::{mpsc, oneshot};

use crate::lifecycle::{MessageSnapshot, TimerKind};
use crate::message::{CbcMessage, MessageId, MessageUpdate};
use crate::operation::PendingOp;
use crate::peer::{PeerReport, PeerSession};
use crate::registry::InstanceId;
use crate::utils::Result;

/// Administrative request addressed by message id.
#[derive(Debug)]
pub enum Request {
    Replace(MessageUpdate),
    Status,
    Delete,
}

pub enum Envelope {
    Create {
        message: CbcMessage,
        peers: Vec<Box<dyn PeerSession>>,
        op: PendingOp,
    },
    Request {
        id: MessageId,
        request: Request,
        op: PendingOp,
    },
    Expire {
        id: MessageId,
        reply: oneshot::Sender<Result<()>>,
    },
    Peer {
        instance: InstanceId,
        peer: String,
        report: PeerReport,
    },
    ChildDied {
        instance: InstanceId,
        peer: String,
    },
    Timer {
        instance: InstanceId,
        kind: TimerKind,
        generation: u64,
    },
    AddPeer {
        id: MessageId,
        peer: Box<dyn PeerSession>,
        reply: oneshot::Sender<Result<()>>,
    },
    RemovePeer {
        id: MessageId,
        peer: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Free {
        id: MessageId,
        reply: oneshot::Sender<Result<CbcMessage>>,
    },
    Find {
        id: MessageId,
        reply: oneshot::Sender<Option<MessageSnapshot>>,
    },
    List {
        reply: oneshot::Sender<Vec<MessageSnapshot>>,
    },
    Expired {
        reply: oneshot::Sender<Vec<MessageSnapshot>>,
    },
    Purge {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl Envelope {
    /// Short label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Envelope::Create { .. } => "create",
            Envelope::Request { .. } => "request",
            Envelope::Expire { .. } => "expire",
            Envelope::Peer { .. } => "peer_report",
            Envelope::ChildDied { .. } => "child_died",
            Envelope::Timer { .. } => "timer",
            Envelope::AddPeer { .. } => "add_peer",
            Envelope::RemovePeer { .. } => "remove_peer",
            Envelope::Free { .. } => "free",
            Envelope::Find { .. } => "find",
            Envelope::List { .. } => "list",
            Envelope::Expired { .. } => "expired",
            Envelope::Purge { .. } => "purge",
            Envelope::Shutdown { .. } => "shutdown",
        }
    }
}

/// Sending side of the orchestrator queue held by handles. The worker runs
/// for as long as at least one `Mailbox` exists.
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Mailbox {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues an envelope; `false` once the worker has stopped.
    pub(crate) fn post(&self, envelope: Envelope) -> bool {
        self.tx.send(envelope).is_ok()
    }

    pub(crate) fn downgrade(&self) -> WeakMailbox {
        WeakMailbox {
            tx: self.tx.downgrade(),
        }
    }
}

/// Sending side held inside the worker (engine, parent links, timers).
/// It does not keep the queue open, so the worker stops once every handle
/// is gone.
#[derive(Debug, Clone)]
pub struct WeakMailbox {
    tx: mpsc::WeakUnboundedSender<Envelope>,
}

impl WeakMailbox {
    /// Queues an envelope; `false` once every handle is dropped or the
    /// worker has stopped.
    pub(crate) fn post(&self, envelope: Envelope) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        }
    }
}
