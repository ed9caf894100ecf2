//! Orchestrator engine
//!
//! The engine is the single worker that owns the [`Registry`] and consumes
//! the envelope queue. Responsibilities:
//! - admitting create requests (rejecting duplicate ids) and attaching peers
//! - pre-checking every administrative request so that a state machine
//!   never sees a request it cannot accept
//! - routing peer reports, child deaths and timer firings to the right
//!   instance by [`InstanceId`]
//! - moving instances to the retired list when they reach a terminal state
//! - periodically purging old retired instances
//! - draining everything on shutdown
//!
//! Concurrency note: all state lives inside this task. Handlers never await,
//! so each envelope is processed to completion before the next one.

use std::ops::ControlFlow;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::LifecycleSettings;
use crate::lifecycle::{Event, MessageState, Refused, TimerKind, Transition};
use crate::message::{CbcMessage, MessageId};
use crate::operation::PendingOp;
use crate::orchestrator::command::{Envelope, Mailbox, Request, WeakMailbox};
use crate::orchestrator::handle::OrchestratorHandle;
use crate::peer::{PeerReport, PeerSession};
use crate::registry::{InstanceId, Registry};
use crate::utils::{LifecycleError, Result};

pub struct Orchestrator {
    registry: Registry,
    mailbox: WeakMailbox,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    settings: LifecycleSettings,
}

impl Orchestrator {
    /// Creates the engine around an injected (normally empty) registry.
    pub fn new(settings: LifecycleSettings, registry: Registry) -> (Self, OrchestratorHandle) {
        let (mailbox, inbox) = Mailbox::channel();
        let weak = mailbox.downgrade();
        let handle = OrchestratorHandle::new(mailbox);
        (
            Self {
                registry,
                mailbox: weak,
                inbox,
                settings,
            },
            handle,
        )
    }

    /// Spawns [`Orchestrator::run`] on the current runtime.
    pub fn spawn(
        settings: LifecycleSettings,
        registry: Registry,
    ) -> (OrchestratorHandle, tokio::task::JoinHandle<Registry>) {
        let (engine, handle) = Self::new(settings, registry);
        (handle, tokio::spawn(engine.run()))
    }

    /// Runs until a shutdown envelope arrives or every handle has been
    /// dropped. Returns the drained registry.
    pub async fn run(mut self) -> Registry {
        let mut purge = tokio::time::interval(self.settings.purge_interval());
        purge.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // the first tick completes immediately
        purge.tick().await;

        info!(
            ack_timeout_secs = self.settings.ack_timeout_secs,
            "orchestrator started"
        );

        let reply = loop {
            tokio::select! {
                envelope = self.inbox.recv() => match envelope {
                    Some(envelope) => {
                        if let ControlFlow::Break(reply) = self.handle(envelope) {
                            break reply;
                        }
                    }
                    None => {
                        info!("all handles dropped");
                        break None;
                    }
                },
                _ = purge.tick() => {
                    self.purge();
                }
            }
        };

        self.drain();
        info!("orchestrator stopped");
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
        self.registry
    }

    /// Processes one envelope to completion.
    pub(crate) fn handle(&mut self, envelope: Envelope) -> ControlFlow<Option<oneshot::Sender<()>>> {
        debug!(envelope = envelope.label(), "dispatching");
        match envelope {
            Envelope::Create { message, peers, op } => self.create(message, peers, op),
            Envelope::Request { id, request, op } => self.request(id, request, op),
            Envelope::Expire { id, reply } => {
                let _ = reply.send(self.expire(id));
            }
            Envelope::Peer {
                instance,
                peer,
                report,
            } => self.peer_report(instance, &peer, report),
            Envelope::ChildDied { instance, peer } => self.child_died(instance, &peer),
            Envelope::Timer {
                instance,
                kind,
                generation,
            } => self.timer(instance, kind, generation),
            Envelope::AddPeer { id, peer, reply } => {
                let _ = reply.send(self.add_peer(id, peer));
            }
            Envelope::RemovePeer { id, peer, reply } => {
                let _ = reply.send(self.remove_peer(id, &peer));
            }
            Envelope::Free { id, reply } => {
                let _ = reply.send(self.free(id));
            }
            Envelope::Find { id, reply } => {
                let _ = reply.send(self.registry.find(id).map(|fsm| fsm.snapshot()));
            }
            Envelope::List { reply } => {
                let _ = reply.send(self.registry.live_snapshots());
            }
            Envelope::Expired { reply } => {
                let _ = reply.send(self.registry.retired_snapshots());
            }
            Envelope::Purge { reply } => {
                let _ = reply.send(self.purge());
            }
            Envelope::Shutdown { reply } => return ControlFlow::Break(Some(reply)),
        }
        ControlFlow::Continue(())
    }

    fn create(&mut self, message: CbcMessage, peers: Vec<Box<dyn PeerSession>>, op: PendingOp) {
        let id = message.message_id;
        let instance =
            match self
                .registry
                .allocate(message, &self.mailbox, self.settings.ack_timeout())
            {
                Ok(instance) => instance,
                Err(e) => {
                    for mut peer in peers {
                        peer.terminate();
                    }
                    return op.reject(e);
                }
            };

        let Some(fsm) = self.registry.get_mut(instance) else {
            return op.reject(LifecycleError::NotFound { id });
        };
        for peer in peers {
            if let Err(dup) = fsm.add_peer(peer) {
                warn!(fsm = fsm.name(), peer = dup.name(), "duplicate peer ignored");
            }
        }

        let result = fsm.dispatch(Event::Create(op));
        let _ = self.after_dispatch(instance, result);
    }

    fn request(&mut self, id: MessageId, request: Request, op: PendingOp) {
        let Some(fsm) = self.registry.find_mut(id) else {
            return op.reject(LifecycleError::NotFound { id });
        };

        let event = match request {
            Request::Replace(update) => Event::Replace(op, update),
            Request::Status => Event::Status(op),
            Request::Delete => Event::Delete(op),
        };

        // exclusivity: only one administrative operation per message
        if fsm.has_pending_op() {
            let state = fsm.state();
            if let Some(op) = event.into_op() {
                op.reject(LifecycleError::Busy { id, state });
            }
            return;
        }

        let instance = fsm.instance();
        let result = fsm.dispatch(event);
        let _ = self.after_dispatch(instance, result);
    }

    fn expire(&mut self, id: MessageId) -> Result<()> {
        let Some(fsm) = self.registry.find_mut(id) else {
            return Err(LifecycleError::NotFound { id });
        };
        let instance = fsm.instance();
        let result = fsm.dispatch(Event::Expire);
        self.after_dispatch(instance, result)
    }

    fn peer_report(&mut self, instance: InstanceId, peer: &str, report: PeerReport) {
        let Some(fsm) = self.registry.get_mut(instance) else {
            debug!(%instance, peer, ?report, "report for unknown instance dropped");
            return;
        };
        debug!(fsm = fsm.name(), peer, ?report, "peer report");
        let result = fsm.dispatch(Event::Peer(report));
        let _ = self.after_dispatch(instance, result);
    }

    fn child_died(&mut self, instance: InstanceId, peer: &str) {
        let Some(fsm) = self.registry.get_mut(instance) else {
            return;
        };
        if let Some(mut session) = fsm.remove_peer(peer) {
            session.terminate();
        }
        info!(fsm = fsm.name(), peer, "child died");
        let result = fsm.dispatch(Event::ChildDied);
        let _ = self.after_dispatch(instance, result);
    }

    fn timer(&mut self, instance: InstanceId, kind: TimerKind, generation: u64) {
        let Some(fsm) = self.registry.get_mut(instance) else {
            return;
        };
        if let Some(transition) = fsm.on_timer(kind, generation) {
            self.on_transition(instance, transition);
        }
    }

    fn add_peer(&mut self, id: MessageId, peer: Box<dyn PeerSession>) -> Result<()> {
        let fsm = self
            .registry
            .find_mut(id)
            .ok_or(LifecycleError::NotFound { id })?;
        fsm.add_peer(peer).map_err(|dup| LifecycleError::PeerExists {
            id,
            peer: dup.name().to_string(),
        })
    }

    fn remove_peer(&mut self, id: MessageId, peer: &str) -> Result<()> {
        let fsm = self
            .registry
            .find_mut(id)
            .ok_or(LifecycleError::NotFound { id })?;
        let instance = fsm.instance();
        let mut session = fsm.remove_peer(peer).ok_or(LifecycleError::NotFound { id })?;
        session.terminate();
        let result = fsm.dispatch(Event::ChildDied);
        self.after_dispatch(instance, result)
    }

    fn free(&mut self, id: MessageId) -> Result<CbcMessage> {
        let instance = self
            .registry
            .find(id)
            .map(|fsm| fsm.instance())
            .ok_or(LifecycleError::NotFound { id })?;
        let (message, op) = self
            .registry
            .free(instance)
            .ok_or(LifecycleError::NotFound { id })?;
        if let Some(op) = op {
            op.reject(LifecycleError::Freed { id });
        }
        Ok(message)
    }

    fn purge(&mut self) -> usize {
        let purged = self
            .registry
            .purge_retired(self.settings.expired_retention(), Utc::now());
        if purged > 0 {
            info!(purged, "purged retired messages");
        }
        purged
    }

    /// Applies registry side effects of a dispatch and turns a refusal into
    /// a caller-visible error.
    fn after_dispatch(
        &mut self,
        instance: InstanceId,
        result: std::result::Result<Option<Transition>, Refused>,
    ) -> Result<()> {
        match result {
            Ok(Some(transition)) => {
                self.on_transition(instance, transition);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(Refused { state, event }) => {
                let kind = event.kind();
                let id = self
                    .registry
                    .get_mut(instance)
                    .map(|fsm| fsm.message_id())
                    .unwrap_or_default();
                let err = LifecycleError::InvalidState {
                    id,
                    state,
                    event: kind,
                };
                match event.into_op() {
                    Some(op) => {
                        op.reject(err);
                        Ok(())
                    }
                    None => Err(err),
                }
            }
        }
    }

    fn on_transition(&mut self, instance: InstanceId, transition: Transition) {
        if matches!(transition.to, MessageState::Deleted | MessageState::Expired) {
            self.registry.retire(instance);
        }
    }

    fn drain(&mut self) {
        let instances = self.registry.drain();
        let count = instances.len();
        for mut fsm in instances {
            if let Some(op) = fsm.take_pending_op() {
                op.reject(LifecycleError::Shutdown);
            }
            fsm.terminate_peers();
            let _ = fsm.into_message();
        }
        if let Some(archive) = self.registry.archive() {
            if let Err(e) = archive.flush() {
                warn!(error = %e, "archive flush failed");
            }
        }
        info!(count, "registry drained");
    }
}
