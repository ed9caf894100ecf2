//! Message lifecycle state machine.
//!
//! One `MessageFsm` exists per broadcast message. It owns the message
//! payload, the ordered set of child peer sessions, at most one pending
//! operation and at most one timer.
//!
//! ## Rules
//! - A pending operation may only be attached while none is attached.
//! - Leaving a WAIT_* state releases the pending operation exactly once.
//! - Every state change cancels the running timer before arming the next.
//! - A barrier fires only when no peer is still outstanding; on timeout the
//!   state advances as if it had fired.
//! - Nacks are aggregated exactly like acks (no distinct failure result yet).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::lifecycle::state::{Event, EventKind, MessageState};
use crate::lifecycle::timer::{ArmedTimer, TimerKind};
use crate::message::{CbcMessage, MessageId, MessageUpdate};
use crate::operation::{OpResult, PendingOp};
use crate::peer::{ParentLink, PeerEvent, PeerSession, PeerState};
use crate::registry::InstanceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: MessageState,
    pub to: MessageState,
}

/// An event the current state does not handle. Requests are handed back so
/// the caller can reject the pending operation.
#[derive(Debug)]
pub struct Refused {
    pub state: MessageState,
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub name: String,
    pub state: PeerState,
}

/// Point-in-time view of a message for queries and logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub instance: InstanceId,
    pub message_id: MessageId,
    pub cbe_name: String,
    pub state: MessageState,
    pub warning_period_sec: u32,
    pub pending_op: bool,
    pub timer: Option<TimerKind>,
    pub peers: Vec<PeerSnapshot>,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

pub struct MessageFsm {
    name: String,
    message: CbcMessage,
    state: MessageState,
    op: Option<PendingOp>,
    peers: Vec<Box<dyn PeerSession>>,
    link: ParentLink,
    ack_timeout: Duration,
    timer: Option<ArmedTimer>,
    timer_generation: u64,
    created_at: DateTime<Utc>,
    retired_at: Option<DateTime<Utc>>,
}

impl MessageFsm {
    pub(crate) fn new(message: CbcMessage, link: ParentLink, ack_timeout: Duration) -> Self {
        Self {
            name: message.instance_name(),
            message,
            state: MessageState::Init,
            op: None,
            peers: Vec::new(),
            link,
            ack_timeout,
            timer: None,
            timer_generation: 0,
            created_at: Utc::now(),
            retired_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> InstanceId {
        self.link.instance()
    }

    pub fn message(&self) -> &CbcMessage {
        &self.message
    }

    pub fn message_id(&self) -> MessageId {
        self.message.message_id
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    pub fn has_pending_op(&self) -> bool {
        self.op.is_some()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn timer_kind(&self) -> Option<TimerKind> {
        self.timer.as_ref().map(ArmedTimer::kind)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn retired_at(&self) -> Option<DateTime<Utc>> {
        self.retired_at
    }

    pub fn snapshot(&self) -> MessageSnapshot {
        MessageSnapshot {
            instance: self.instance(),
            message_id: self.message.message_id,
            cbe_name: self.message.cbe_name.clone(),
            state: self.state,
            warning_period_sec: self.message.warning_period_sec,
            pending_op: self.op.is_some(),
            timer: self.timer_kind(),
            peers: self
                .peers
                .iter()
                .map(|p| PeerSnapshot {
                    name: p.name().to_string(),
                    state: p.state(),
                })
                .collect(),
            created_at: self.created_at,
            retired_at: self.retired_at,
        }
    }

    /// Adds a child session. Names are unique per message; a duplicate is
    /// handed back.
    pub fn add_peer(
        &mut self,
        peer: Box<dyn PeerSession>,
    ) -> Result<(), Box<dyn PeerSession>> {
        if self.peers.iter().any(|p| p.name() == peer.name()) {
            return Err(peer);
        }
        debug!(fsm = %self.name, peer = peer.name(), "peer attached");
        self.peers.push(peer);
        Ok(())
    }

    /// Unlinks a child session. The parent still has to be told through a
    /// `CHILD_DIED` event.
    pub fn remove_peer(&mut self, name: &str) -> Option<Box<dyn PeerSession>> {
        let idx = self.peers.iter().position(|p| p.name() == name)?;
        debug!(fsm = %self.name, peer = name, "peer unlinked");
        Some(self.peers.remove(idx))
    }

    /// Terminates and drops every child session.
    pub fn terminate_peers(&mut self) -> usize {
        let count = self.peers.len();
        for mut peer in self.peers.drain(..) {
            peer.terminate();
        }
        count
    }

    /// Detaches the pending operation without completing it, for teardown
    /// paths that reject it instead.
    pub fn take_pending_op(&mut self) -> Option<PendingOp> {
        self.op.take()
    }

    /// Destroys the instance and returns its payload.
    ///
    /// # Panics
    /// If child sessions are still attached.
    pub fn into_message(self) -> CbcMessage {
        if !self.peers.is_empty() {
            error!(fsm = %self.name, peers = self.peers.len(), "teardown with live peers");
        }
        assert!(
            self.peers.is_empty(),
            "{}: torn down with {} peers attached",
            self.name,
            self.peers.len()
        );
        self.message
    }

    /// Handles one event to completion.
    pub fn dispatch(&mut self, event: Event) -> Result<Option<Transition>, Refused> {
        let kind = event.kind();
        if !self.state.accepts(kind) {
            warn!(fsm = %self.name, state = %self.state, event = %kind, "event not permitted");
            return Err(Refused {
                state: self.state,
                event,
            });
        }
        debug!(fsm = %self.name, state = %self.state, event = %kind, "received event");

        let from = self.state;
        match (self.state, event) {
            (_, Event::ChildDied) => {}
            (MessageState::Init, Event::Create(op)) => {
                self.attach(op);
                self.state_chg(MessageState::WaitWriteAck);
                self.fan_out(PeerEvent::Create);
            }
            (MessageState::Active, Event::Replace(op, update)) => self.start_replace(op, update),
            (MessageState::Active, Event::Status(op)) => {
                self.attach(op);
                self.state_chg(MessageState::WaitStatusAck);
                self.fan_out(PeerEvent::Status);
            }
            (MessageState::Active, Event::Delete(op)) => {
                self.attach(op);
                self.state_chg(MessageState::WaitDeleteAck);
                self.fan_out(PeerEvent::Delete);
            }
            (MessageState::Active, Event::Expire) => {
                info!(
                    fsm = %self.name,
                    message_id = self.message.message_id,
                    warning_period_sec = self.message.warning_period_sec,
                    "message expired, moving to EXPIRED state"
                );
                self.state_chg(MessageState::Expired);
            }
            (state, Event::Peer(_)) if state.is_waiting() => {
                if self.barrier_pending() {
                    return Ok(None);
                }
                self.finish_wait();
            }
            (state, _) => self.unexpected(state, kind),
        }

        Ok((self.state != from).then_some(Transition {
            from,
            to: self.state,
        }))
    }

    /// Handles a timer envelope. Returns `None` for stale or cancelled timers.
    pub fn on_timer(&mut self, kind: TimerKind, generation: u64) -> Option<Transition> {
        match &self.timer {
            Some(timer) if timer.matches(kind, generation) => {}
            _ => {
                debug!(fsm = %self.name, ?kind, generation, "ignoring stale timer");
                return None;
            }
        }
        self.timer = None;

        let from = self.state;
        match kind {
            TimerKind::ActiveExpiry => {
                info!(
                    fsm = %self.name,
                    message_id = self.message.message_id,
                    warning_period_sec = self.message.warning_period_sec,
                    "active expiry timer fired"
                );
                if let Err(refused) = self.dispatch(Event::Expire) {
                    self.unexpected(refused.state, EventKind::Expire);
                }
            }
            _ => {
                assert_eq!(
                    self.state.ack_timer(),
                    Some(kind),
                    "{}: timer {kind:?} fired in state {}",
                    self.name,
                    self.state
                );
                warn!(
                    fsm = %self.name,
                    state = %self.state,
                    outstanding = self.outstanding_peers(),
                    "timeout waiting for peers, advancing"
                );
                self.finish_wait();
            }
        }

        Some(Transition {
            from,
            to: self.state,
        })
    }

    fn start_replace(&mut self, op: PendingOp, update: MessageUpdate) {
        self.attach(op);
        self.message.apply(update);
        self.state_chg(MessageState::WaitReplaceAck);
        self.fan_out(PeerEvent::Replace);
    }

    fn attach(&mut self, op: PendingOp) {
        assert!(
            self.op.is_none(),
            "{}: operation attached while another is pending",
            self.name
        );
        debug!(fsm = %self.name, op = %op.id(), "operation attached");
        self.op = Some(op);
    }

    fn fan_out(&mut self, event: PeerEvent) {
        for peer in self.peers.iter_mut() {
            peer.on_parent_event(event, &self.message, &self.link);
        }
    }

    /// Barrier predicate for the current wait state: true while at least one
    /// peer has not settled.
    fn barrier_pending(&self) -> bool {
        self.outstanding_peers() > 0
    }

    fn outstanding_peers(&self) -> usize {
        let pending: fn(PeerState) -> bool = match self.state {
            MessageState::WaitWriteAck => |s| s != PeerState::Active,
            MessageState::WaitReplaceAck => |s| s == PeerState::WaitReplaceAck,
            MessageState::WaitStatusAck => |s| s == PeerState::WaitStatusAck,
            MessageState::WaitDeleteAck => |s| s != PeerState::Deleted,
            _ => return 0,
        };
        self.peers.iter().filter(|p| pending(p.state())).count()
    }

    // FIXME: nacks and timeouts still report success; no failure result yet.
    fn finish_wait(&mut self) {
        match self.state {
            MessageState::WaitWriteAck => {
                self.set_result(OpResult::created());
                self.state_chg(MessageState::Active);
                self.arm_expiry();
            }
            MessageState::WaitReplaceAck | MessageState::WaitStatusAck => {
                self.set_result(OpResult::ok());
                self.state_chg(MessageState::Active);
                self.arm_expiry();
            }
            MessageState::WaitDeleteAck => {
                self.set_result(OpResult::ok());
                self.state_chg(MessageState::Deleted);
            }
            state => panic!("{}: barrier completed in state {state}", self.name),
        }
    }

    fn set_result(&mut self, result: OpResult) {
        if let Some(op) = self.op.as_mut() {
            op.set_result(result.code, &result.text);
        }
    }

    fn state_chg(&mut self, next: MessageState) {
        let prev = self.state;
        assert!(
            prev.allows(next),
            "{}: transition {prev} -> {next} not permitted",
            self.name
        );

        self.timer = None;
        if prev.is_waiting() {
            self.release_op();
        }

        self.state = next;
        info!(fsm = %self.name, from = %prev, to = %next, "state change");

        match next {
            MessageState::Deleted | MessageState::Expired => {
                self.release_op();
                self.retired_at = Some(Utc::now());
            }
            _ => {}
        }

        if let Some(kind) = next.ack_timer() {
            self.arm(kind, self.ack_timeout);
        }
    }

    fn release_op(&mut self) {
        if let Some(op) = self.op.take() {
            debug!(
                fsm = %self.name,
                op = %op.id(),
                result = ?op.result(),
                "operation released"
            );
            op.complete();
        }
    }

    fn arm_expiry(&mut self) {
        if let Some(delay) = self.message.expiry() {
            info!(
                fsm = %self.name,
                message_id = self.message.message_id,
                secs = delay.as_secs(),
                "starting active expiry timer"
            );
            self.arm(TimerKind::ActiveExpiry, delay);
        }
    }

    fn arm(&mut self, kind: TimerKind, delay: Duration) {
        self.timer_generation += 1;
        self.timer = Some(ArmedTimer::schedule(
            &self.link,
            kind,
            self.timer_generation,
            delay,
        ));
    }

    fn unexpected(&self, state: MessageState, event: EventKind) -> ! {
        error!(fsm = %self.name, %state, %event, "unhandled event");
        panic!("{}: event {event} unhandled in state {state}", self.name);
    }
}

impl std::fmt::Debug for MessageFsm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageFsm")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("peers", &self.peers.len())
            .field("pending_op", &self.op.is_some())
            .finish()
    }
}
