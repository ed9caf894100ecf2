//! Single-fire timers delivered back into the orchestrator queue.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::orchestrator::command::Envelope;
use crate::peer::ParentLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    WaitWriteAck,
    WaitReplaceAck,
    WaitStatusAck,
    WaitDeleteAck,
    ActiveExpiry,
}

/// A scheduled timer. Dropping it cancels the timer.
///
/// A firing that races with cancellation is filtered out by the generation
/// check in the state machine.
#[derive(Debug)]
pub(crate) struct ArmedTimer {
    kind: TimerKind,
    generation: u64,
    handle: JoinHandle<()>,
}

impl ArmedTimer {
    pub(crate) fn schedule(
        link: &ParentLink,
        kind: TimerKind,
        generation: u64,
        delay: Duration,
    ) -> Self {
        let mailbox = link.mailbox().clone();
        let instance = link.instance();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            mailbox.post(Envelope::Timer {
                instance,
                kind,
                generation,
            });
        });
        Self {
            kind,
            generation,
            handle,
        }
    }

    pub(crate) fn kind(&self) -> TimerKind {
        self.kind
    }

    pub(crate) fn matches(&self, kind: TimerKind, generation: u64) -> bool {
        self.kind == kind && self.generation == generation
    }
}

impl Drop for ArmedTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
