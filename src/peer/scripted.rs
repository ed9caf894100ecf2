//! In-process delivery peer.
//!
//! `ScriptedPeer` stands in for a real per-peer protocol session. It moves
//! to the matching wait state on every parent event and then answers either
//! immediately ([`Responder::Auto`], [`Responder::Nack`]) or when the test
//! or demo drives it through its [`PeerController`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::message::CbcMessage;
use crate::peer::session::{ParentLink, PeerEvent, PeerReport, PeerSession, PeerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Responder {
    /// Acknowledge every event as soon as it arrives.
    Auto,
    /// Negatively acknowledge every event as soon as it arrives.
    Nack,
    /// Wait for [`PeerController::ack`] / [`PeerController::nack`].
    Manual,
}

#[derive(Debug)]
struct Script {
    state: PeerState,
    responder: Responder,
    link: Option<ParentLink>,
    pending: Option<PeerEvent>,
    received: Vec<PeerEvent>,
    last_report: Option<PeerReport>,
    terminated: bool,
}

#[derive(Debug)]
pub struct ScriptedPeer {
    name: String,
    script: Arc<Mutex<Script>>,
}

/// Remote control for a [`ScriptedPeer`] that has been handed to a message.
#[derive(Debug, Clone)]
pub struct PeerController {
    name: String,
    script: Arc<Mutex<Script>>,
}

fn lock(script: &Mutex<Script>) -> MutexGuard<'_, Script> {
    script.lock().unwrap_or_else(PoisonError::into_inner)
}

fn waiting_state(event: PeerEvent) -> PeerState {
    match event {
        PeerEvent::Create => PeerState::WaitWriteAck,
        PeerEvent::Replace => PeerState::WaitReplaceAck,
        PeerEvent::Status => PeerState::WaitStatusAck,
        PeerEvent::Delete => PeerState::WaitDeleteAck,
    }
}

// Nacks land in the same state as acks; the parent only sees the report kind.
fn settled_state(event: PeerEvent) -> PeerState {
    match event {
        PeerEvent::Delete => PeerState::Deleted,
        _ => PeerState::Active,
    }
}

/// Settles the pending event and reports to the parent. The lock is
/// released before posting.
fn settle(name: &str, script: &Mutex<Script>, success: bool) -> bool {
    let (link, report) = {
        let mut s = lock(script);
        let Some(event) = s.pending.take() else {
            return false;
        };
        let report = PeerReport::for_event(event, success);
        s.state = settled_state(event);
        s.last_report = Some(report);
        match s.link.clone() {
            Some(link) => (link, report),
            None => return false,
        }
    };
    link.report(name, report)
}

impl ScriptedPeer {
    pub fn new(name: &str, responder: Responder) -> (Self, PeerController) {
        let script = Arc::new(Mutex::new(Script {
            state: PeerState::Init,
            responder,
            link: None,
            pending: None,
            received: Vec::new(),
            last_report: None,
            terminated: false,
        }));
        (
            Self {
                name: name.to_string(),
                script: script.clone(),
            },
            PeerController {
                name: name.to_string(),
                script,
            },
        )
    }

    /// A peer that acknowledges everything immediately.
    pub fn auto(name: &str) -> Self {
        Self::new(name, Responder::Auto).0
    }

    /// Boxed form for attaching to a message.
    pub fn boxed(self) -> Box<dyn PeerSession> {
        Box::new(self)
    }
}

impl PeerSession for ScriptedPeer {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> PeerState {
        lock(&self.script).state
    }

    fn on_parent_event(&mut self, event: PeerEvent, message: &CbcMessage, parent: &ParentLink) {
        let responder = {
            let mut s = lock(&self.script);
            s.state = waiting_state(event);
            s.pending = Some(event);
            s.received.push(event);
            s.link = Some(parent.clone());
            s.responder
        };
        tracing::debug!(
            peer = %self.name,
            message_id = message.message_id,
            ?event,
            "peer received lifecycle event"
        );

        match responder {
            Responder::Auto => {
                settle(&self.name, &self.script, true);
            }
            Responder::Nack => {
                settle(&self.name, &self.script, false);
            }
            Responder::Manual => {}
        }
    }

    fn terminate(&mut self) {
        let mut s = lock(&self.script);
        s.terminated = true;
        s.pending = None;
    }
}

impl PeerController {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PeerState {
        lock(&self.script).state
    }

    /// Completes the pending event successfully. Returns `false` if nothing
    /// was pending or the parent is gone.
    pub fn ack(&self) -> bool {
        settle(&self.name, &self.script, true)
    }

    pub fn nack(&self) -> bool {
        settle(&self.name, &self.script, false)
    }

    /// Simulates the session dying without answering.
    pub fn die(&self) -> bool {
        let link = {
            let mut s = lock(&self.script);
            s.pending = None;
            s.link.clone()
        };
        link.is_some_and(|link| link.child_died(&self.name))
    }

    pub fn received(&self) -> Vec<PeerEvent> {
        lock(&self.script).received.clone()
    }

    pub fn last_report(&self) -> Option<PeerReport> {
        lock(&self.script).last_report
    }

    pub fn is_terminated(&self) -> bool {
        lock(&self.script).terminated
    }
}
