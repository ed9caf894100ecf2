use tokio::sync::oneshot;

use crate::lifecycle::MessageSnapshot;
use crate::message::{CbcMessage, MessageId, MessageUpdate};
use crate::operation::{OpWaiter, PendingOp};
use crate::orchestrator::command::{Envelope, Mailbox, Request};
use crate::peer::PeerSession;
use crate::utils::{LifecycleError, Result};

/// Cloneable front door to a running [`Orchestrator`](super::Orchestrator).
///
/// Lifecycle requests return an [`OpWaiter`] immediately; the waiter
/// resolves once the corresponding step has completed (or was rejected).
///
/// The worker stops once the last handle is dropped, exactly as if
/// [`OrchestratorHandle::shutdown`] had been called.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    mailbox: Mailbox,
}

impl OrchestratorHandle {
    pub(crate) fn new(mailbox: Mailbox) -> Self {
        Self { mailbox }
    }

    /// Creates a message and fans CREATE out to `peers`.
    pub fn create(&self, message: CbcMessage, peers: Vec<Box<dyn PeerSession>>) -> OpWaiter {
        let (op, waiter) = PendingOp::new();
        self.mailbox.post(Envelope::Create { message, peers, op });
        waiter
    }

    pub fn replace(&self, id: MessageId, update: MessageUpdate) -> OpWaiter {
        self.request(id, Request::Replace(update))
    }

    pub fn status(&self, id: MessageId) -> OpWaiter {
        self.request(id, Request::Status)
    }

    pub fn delete(&self, id: MessageId) -> OpWaiter {
        self.request(id, Request::Delete)
    }

    /// Forces an ACTIVE message into EXPIRED.
    pub async fn expire(&self, id: MessageId) -> Result<()> {
        self.call(|reply| Envelope::Expire { id, reply })
            .await
            .and_then(|res| res)
    }

    pub async fn add_peer(&self, id: MessageId, peer: Box<dyn PeerSession>) -> Result<()> {
        self.call(|reply| Envelope::AddPeer { id, peer, reply })
            .await
            .and_then(|res| res)
    }

    /// Unlinks a peer; the message sees `CHILD_DIED`.
    pub async fn remove_peer(&self, id: MessageId, peer: &str) -> Result<()> {
        let peer = peer.to_string();
        self.call(|reply| Envelope::RemovePeer { id, peer, reply })
            .await
            .and_then(|res| res)
    }

    /// Tears down a live message and returns its payload.
    pub async fn free(&self, id: MessageId) -> Result<CbcMessage> {
        self.call(|reply| Envelope::Free { id, reply })
            .await
            .and_then(|res| res)
    }

    pub async fn find(&self, id: MessageId) -> Result<Option<MessageSnapshot>> {
        self.call(|reply| Envelope::Find { id, reply }).await
    }

    pub async fn list(&self) -> Result<Vec<MessageSnapshot>> {
        self.call(|reply| Envelope::List { reply }).await
    }

    pub async fn expired(&self) -> Result<Vec<MessageSnapshot>> {
        self.call(|reply| Envelope::Expired { reply }).await
    }

    /// Purges retired messages older than the configured retention now.
    pub async fn purge(&self) -> Result<usize> {
        self.call(|reply| Envelope::Purge { reply }).await
    }

    /// Stops the worker after draining every message. Pending operations
    /// are rejected with `Shutdown`.
    pub async fn shutdown(&self) -> Result<()> {
        self.call(|reply| Envelope::Shutdown { reply }).await
    }

    fn request(&self, id: MessageId, request: Request) -> OpWaiter {
        let (op, waiter) = PendingOp::new();
        self.mailbox.post(Envelope::Request { id, request, op });
        waiter
    }

    async fn call<T>(&self, envelope: impl FnOnce(oneshot::Sender<T>) -> Envelope) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        if !self.mailbox.post(envelope(tx)) {
            return Err(LifecycleError::Shutdown);
        }
        rx.await.map_err(|_| LifecycleError::Shutdown)
    }
}
