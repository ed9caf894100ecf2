use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use super::{Event, EventKind, MessageFsm, MessageState, TimerKind, Transition};
use crate::message::{BroadcastContent, CbcMessage, MessageUpdate};
use crate::operation::{OpResult, OpWaiter, PendingOp};
use crate::orchestrator::command::{Envelope, Mailbox};
use crate::peer::{ParentLink, PeerController, PeerEvent, PeerReport, Responder, ScriptedPeer};
use crate::registry::InstanceId;

const ACK_TIMEOUT: Duration = Duration::from_secs(15);

/// Queue end of the test state machine. The strong mailbox stands in for a
/// live orchestrator handle.
struct Inbox {
    _mailbox: Mailbox,
    rx: UnboundedReceiver<Envelope>,
}

fn fsm_with_peers(
    message: CbcMessage,
    peers: usize,
) -> (MessageFsm, Vec<PeerController>, Inbox) {
    let (mailbox, rx) = Mailbox::channel();
    let link = ParentLink::new(message.message_id, InstanceId(1), mailbox.downgrade());
    let mut fsm = MessageFsm::new(message, link, ACK_TIMEOUT);
    let mut controllers = Vec::new();
    for i in 0..peers {
        let (peer, ctl) = ScriptedPeer::new(&format!("peer-{i}"), Responder::Manual);
        fsm.add_peer(peer.boxed()).unwrap();
        controllers.push(ctl);
    }
    let inbox = Inbox {
        _mailbox: mailbox,
        rx,
    };
    (fsm, controllers, inbox)
}

fn create(fsm: &mut MessageFsm) -> OpWaiter {
    let (op, waiter) = PendingOp::new();
    let transition = fsm.dispatch(Event::Create(op)).unwrap();
    assert_eq!(
        transition,
        Some(Transition {
            from: MessageState::Init,
            to: MessageState::WaitWriteAck
        })
    );
    waiter
}

/// Feeds every queued peer report into the state machine.
fn pump(fsm: &mut MessageFsm, inbox: &mut Inbox) -> Vec<Transition> {
    let mut transitions = Vec::new();
    while let Ok(envelope) = inbox.rx.try_recv() {
        if let Envelope::Peer { report, .. } = envelope {
            if let Ok(Some(t)) = fsm.dispatch(Event::Peer(report)) {
                transitions.push(t);
            }
        }
    }
    transitions
}

/// Waits for the next timer envelope and applies it.
async fn fire_timer(fsm: &mut MessageFsm, inbox: &mut Inbox) -> Option<Transition> {
    loop {
        match inbox.rx.recv().await {
            Some(Envelope::Timer {
                kind, generation, ..
            }) => return fsm.on_timer(kind, generation),
            Some(_) => continue,
            None => return None,
        }
    }
}

#[test]
fn test_state_names() {
    assert_eq!(MessageState::WaitWriteAck.to_string(), "WAIT_WRITE_ACK");
    assert_eq!(MessageState::Expired.name(), "EXPIRED");
    assert_eq!(EventKind::ChildDied.to_string(), "CHILD_DIED");
    assert_eq!(EventKind::from(PeerReport::DeleteNack), EventKind::DeleteNack);
}

#[test]
fn test_child_died_accepted_everywhere() {
    for state in [
        MessageState::Init,
        MessageState::WaitWriteAck,
        MessageState::Active,
        MessageState::WaitDeleteAck,
        MessageState::Deleted,
        MessageState::Expired,
    ] {
        assert!(state.accepts(EventKind::ChildDied), "{state}");
    }
}

#[test]
fn test_permitted_events() {
    assert!(MessageState::Init.accepts(EventKind::Create));
    assert!(!MessageState::Init.accepts(EventKind::Delete));
    assert!(MessageState::WaitWriteAck.accepts(EventKind::WriteNack));
    assert!(!MessageState::WaitWriteAck.accepts(EventKind::ReplaceAck));
    assert!(MessageState::Active.accepts(EventKind::Expire));
    assert!(!MessageState::Active.accepts(EventKind::WriteAck));
    assert!(!MessageState::Deleted.accepts(EventKind::Delete));
}

#[test]
fn test_permitted_transitions() {
    assert!(MessageState::Init.allows(MessageState::WaitWriteAck));
    assert!(!MessageState::Init.allows(MessageState::Active));
    assert!(MessageState::Active.allows(MessageState::Active));
    assert!(MessageState::Active.allows(MessageState::Expired));
    assert!(!MessageState::Active.allows(MessageState::Deleted));
    assert!(MessageState::WaitDeleteAck.allows(MessageState::Deleted));
    assert!(!MessageState::Expired.allows(MessageState::Active));
}

#[test]
fn test_ack_timers_only_in_wait_states() {
    assert_eq!(
        MessageState::WaitStatusAck.ack_timer(),
        Some(TimerKind::WaitStatusAck)
    );
    assert_eq!(MessageState::Active.ack_timer(), None);
    assert!(MessageState::WaitReplaceAck.is_waiting());
    assert!(!MessageState::Active.is_waiting());
    assert!(MessageState::Deleted.is_terminal());
}

#[tokio::test]
async fn test_write_barrier_waits_for_every_peer() {
    let (mut fsm, peers, mut rx) = fsm_with_peers(CbcMessage::new("cbe", 42), 3);
    let mut waiter = create(&mut fsm);

    assert!(fsm.has_pending_op());
    assert_eq!(fsm.timer_kind(), Some(TimerKind::WaitWriteAck));
    for peer in &peers {
        assert_eq!(peer.received(), vec![PeerEvent::Create]);
    }

    assert!(peers[0].ack());
    assert!(peers[1].ack());
    assert!(pump(&mut fsm, &mut rx).is_empty());
    assert_eq!(fsm.state(), MessageState::WaitWriteAck);
    assert!(waiter.try_result().is_none());

    assert!(peers[2].ack());
    let transitions = pump(&mut fsm, &mut rx);
    assert_eq!(
        transitions,
        vec![Transition {
            from: MessageState::WaitWriteAck,
            to: MessageState::Active
        }]
    );
    assert_eq!(waiter.try_result().unwrap().unwrap(), OpResult::created());
    assert!(!fsm.has_pending_op());
    // never-expiring message: no timer in ACTIVE
    assert_eq!(fsm.timer_kind(), None);
}

#[tokio::test]
async fn test_nack_counts_toward_barrier() {
    let (mut fsm, peers, mut rx) = fsm_with_peers(CbcMessage::new("cbe", 5), 2);
    let mut waiter = create(&mut fsm);

    peers[0].nack();
    peers[1].ack();
    pump(&mut fsm, &mut rx);

    assert_eq!(fsm.state(), MessageState::Active);
    assert_eq!(waiter.try_result().unwrap().unwrap().code, 201);
}

#[tokio::test]
async fn test_expiry_timer_armed_in_active() {
    let message = CbcMessage::new("cbe", 7).with_warning_period(30);
    let (mut fsm, peers, mut rx) = fsm_with_peers(message, 1);
    let _waiter = create(&mut fsm);

    peers[0].ack();
    pump(&mut fsm, &mut rx);
    assert_eq!(fsm.timer_kind(), Some(TimerKind::ActiveExpiry));
}

#[tokio::test(start_paused = true)]
async fn test_expiry_timer_moves_to_expired() {
    let message = CbcMessage::new("cbe", 7).with_warning_period(30);
    let (mut fsm, peers, mut rx) = fsm_with_peers(message, 1);
    let _waiter = create(&mut fsm);
    peers[0].ack();
    pump(&mut fsm, &mut rx);

    let start = tokio::time::Instant::now();
    let transition = fire_timer(&mut fsm, &mut rx).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(30));
    assert_eq!(transition.to, MessageState::Expired);
    assert!(fsm.retired_at().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_write_timeout_forces_active() {
    let (mut fsm, peers, mut rx) = fsm_with_peers(CbcMessage::new("cbe", 42), 2);
    let mut waiter = create(&mut fsm);
    peers[0].ack();
    pump(&mut fsm, &mut rx);

    let start = tokio::time::Instant::now();
    let transition = fire_timer(&mut fsm, &mut rx).await.unwrap();
    assert!(start.elapsed() >= ACK_TIMEOUT);
    assert!(start.elapsed() < ACK_TIMEOUT + Duration::from_secs(1));
    assert_eq!(transition.to, MessageState::Active);
    // completed exactly as the barrier would have
    assert_eq!(waiter.try_result().unwrap().unwrap(), OpResult::created());

    // the straggler's late ack is refused and changes nothing
    peers[1].ack();
    assert!(pump(&mut fsm, &mut rx).is_empty());
    assert_eq!(fsm.state(), MessageState::Active);
}

/// Brings a message with a 300s warning period to ACTIVE through the
/// write barrier.
fn active_fsm(peers: usize) -> (MessageFsm, Vec<PeerController>, Inbox) {
    let message = CbcMessage::new("cbe", 21).with_warning_period(300);
    let (mut fsm, ctls, mut rx) = fsm_with_peers(message, peers);
    let _create = create(&mut fsm);
    for ctl in &ctls {
        assert!(ctl.ack());
    }
    pump(&mut fsm, &mut rx);
    assert_eq!(fsm.state(), MessageState::Active);
    (fsm, ctls, rx)
}

#[tokio::test(start_paused = true)]
async fn test_status_timeout_returns_to_active() {
    let (mut fsm, peers, mut rx) = active_fsm(2);
    let (op, mut waiter) = PendingOp::new();
    fsm.dispatch(Event::Status(op)).unwrap();
    assert_eq!(fsm.timer_kind(), Some(TimerKind::WaitStatusAck));

    assert!(peers[0].ack());
    assert!(pump(&mut fsm, &mut rx).is_empty());
    assert!(waiter.try_result().is_none());

    let start = tokio::time::Instant::now();
    let transition = fire_timer(&mut fsm, &mut rx).await.unwrap();
    assert!(start.elapsed() >= ACK_TIMEOUT);
    assert!(start.elapsed() < ACK_TIMEOUT + Duration::from_secs(1));
    assert_eq!(
        transition,
        Transition {
            from: MessageState::WaitStatusAck,
            to: MessageState::Active
        }
    );
    assert_eq!(waiter.try_result().unwrap().unwrap(), OpResult::ok());
    assert!(!fsm.has_pending_op());
    assert_eq!(fsm.timer_kind(), Some(TimerKind::ActiveExpiry));
}

#[tokio::test(start_paused = true)]
async fn test_replace_timeout_returns_to_active() {
    let (mut fsm, _peers, mut rx) = active_fsm(2);
    let update = MessageUpdate {
        content: BroadcastContent {
            serial_nr: 9,
            dcs: 0,
            pages: vec!["late".into()],
        },
        params: None,
        warning_period_sec: None,
    };
    let (op, mut waiter) = PendingOp::new();
    fsm.dispatch(Event::Replace(op, update)).unwrap();
    assert_eq!(fsm.timer_kind(), Some(TimerKind::WaitReplaceAck));

    let start = tokio::time::Instant::now();
    let transition = fire_timer(&mut fsm, &mut rx).await.unwrap();
    assert!(start.elapsed() >= ACK_TIMEOUT);
    assert!(start.elapsed() < ACK_TIMEOUT + Duration::from_secs(1));
    assert_eq!(transition.from, MessageState::WaitReplaceAck);
    assert_eq!(transition.to, MessageState::Active);
    assert_eq!(waiter.try_result().unwrap().unwrap(), OpResult::ok());
    assert_eq!(fsm.timer_kind(), Some(TimerKind::ActiveExpiry));
    assert_eq!(fsm.message().content.serial_nr, 9);

    // the expiry timer that was running before REPLACE was cancelled
    assert!(fsm.on_timer(TimerKind::ActiveExpiry, 2).is_none());
}

#[tokio::test]
async fn test_stale_timer_ignored() {
    let (mut fsm, _peers, _rx) = fsm_with_peers(CbcMessage::new("cbe", 1), 1);
    let _waiter = create(&mut fsm);

    assert!(fsm.on_timer(TimerKind::WaitWriteAck, 999).is_none());
    assert!(fsm.on_timer(TimerKind::ActiveExpiry, 1).is_none());
    assert_eq!(fsm.state(), MessageState::WaitWriteAck);
}

#[tokio::test]
async fn test_replace_applies_update_and_waits() {
    let (mut fsm, peers, mut rx) = fsm_with_peers(CbcMessage::new("cbe", 3), 2);
    let _create = create(&mut fsm);
    peers.iter().for_each(|p| {
        p.ack();
    });
    pump(&mut fsm, &mut rx);

    let update = MessageUpdate {
        content: BroadcastContent {
            serial_nr: 2,
            dcs: 0x0f,
            pages: vec!["updated".into()],
        },
        params: None,
        warning_period_sec: Some(60),
    };
    let (op, mut waiter) = PendingOp::new();
    fsm.dispatch(Event::Replace(op, update)).unwrap();

    assert_eq!(fsm.state(), MessageState::WaitReplaceAck);
    assert_eq!(fsm.message().content.serial_nr, 2);
    assert_eq!(fsm.message().warning_period_sec, 60);

    peers[0].ack();
    pump(&mut fsm, &mut rx);
    assert!(waiter.try_result().is_none());

    peers[1].ack();
    pump(&mut fsm, &mut rx);
    assert_eq!(fsm.state(), MessageState::Active);
    assert_eq!(waiter.try_result().unwrap().unwrap(), OpResult::ok());
    assert_eq!(fsm.timer_kind(), Some(TimerKind::ActiveExpiry));
}

#[tokio::test]
async fn test_delete_barrier_reaches_deleted() {
    let (mut fsm, peers, mut rx) = fsm_with_peers(CbcMessage::new("cbe", 9), 2);
    let _create = create(&mut fsm);
    peers.iter().for_each(|p| {
        p.ack();
    });
    pump(&mut fsm, &mut rx);

    let (op, mut waiter) = PendingOp::new();
    fsm.dispatch(Event::Delete(op)).unwrap();
    assert_eq!(fsm.state(), MessageState::WaitDeleteAck);

    peers[0].ack();
    peers[1].nack();
    let transitions = pump(&mut fsm, &mut rx);

    assert_eq!(transitions.last().unwrap().to, MessageState::Deleted);
    assert_eq!(waiter.try_result().unwrap().unwrap(), OpResult::ok());
    assert!(fsm.retired_at().is_some());
    assert_eq!(fsm.timer_kind(), None);
}

#[tokio::test]
async fn test_child_died_is_ignored() {
    let (mut fsm, peers, mut rx) = fsm_with_peers(CbcMessage::new("cbe", 9), 2);
    let _create = create(&mut fsm);
    peers.iter().for_each(|p| {
        p.ack();
    });
    pump(&mut fsm, &mut rx);
    let (op, _waiter) = PendingOp::new();
    fsm.dispatch(Event::Delete(op)).unwrap();

    let removed = fsm.remove_peer("peer-0");
    assert!(removed.is_some());
    assert_eq!(fsm.dispatch(Event::ChildDied).unwrap(), None);
    assert_eq!(fsm.state(), MessageState::WaitDeleteAck);
    assert_eq!(fsm.peer_count(), 1);
}

#[tokio::test]
async fn test_unexpected_event_refused() {
    let (mut fsm, _peers, _rx) = fsm_with_peers(CbcMessage::new("cbe", 2), 1);

    let refused = fsm.dispatch(Event::Peer(PeerReport::WriteAck)).unwrap_err();
    assert_eq!(refused.state, MessageState::Init);
    assert_eq!(refused.event.kind(), EventKind::WriteAck);

    let (op, _waiter) = PendingOp::new();
    let refused = fsm.dispatch(Event::Status(op)).unwrap_err();
    assert!(refused.event.into_op().is_some());
    assert_eq!(fsm.state(), MessageState::Init);
}

#[test]
fn test_duplicate_peer_name_handed_back() {
    let (mut fsm, _peers, _rx) = fsm_with_peers(CbcMessage::new("cbe", 2), 1);
    let dup = ScriptedPeer::auto("peer-0").boxed();
    assert!(fsm.add_peer(dup).is_err());
    assert_eq!(fsm.peer_count(), 1);
}

#[test]
fn test_snapshot_reports_peers() {
    let (fsm, _peers, _rx) = fsm_with_peers(CbcMessage::new("cbe", 42), 2);
    let snap = fsm.snapshot();
    assert_eq!(fsm.name(), "cbe-42");
    assert_eq!(snap.message_id, 42);
    assert_eq!(snap.state, MessageState::Init);
    assert_eq!(snap.peers.len(), 2);
    assert!(!snap.pending_op);
}

#[test]
#[should_panic(expected = "peers attached")]
fn test_teardown_with_peers_panics() {
    let (fsm, _peers, _rx) = fsm_with_peers(CbcMessage::new("cbe", 2), 1);
    let _ = fsm.into_message();
}

#[test]
fn test_teardown_after_terminating_peers() {
    let (mut fsm, peers, _rx) = fsm_with_peers(CbcMessage::new("cbe", 2), 2);
    assert_eq!(fsm.terminate_peers(), 2);
    assert!(peers.iter().all(PeerController::is_terminated));
    assert_eq!(fsm.into_message().message_id, 2);
}
