//! Registry of message state machines.
//!
//! Instances live in an arena keyed by [`InstanceId`]. The live index maps a
//! message id to its instance; once an instance reaches DELETED or EXPIRED
//! it moves to the retired list, which frees the message id for reuse.
//! Every instance is in exactly one of the two at any time.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::lifecycle::{MessageFsm, MessageSnapshot};
use crate::message::{CbcMessage, MessageId};
use crate::operation::PendingOp;
use crate::orchestrator::command::WeakMailbox;
use crate::peer::ParentLink;
use crate::persistence::{Archive, RetiredMessage};
use crate::utils::{LifecycleError, Result};

/// Arena key of one state machine instance. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    instances: HashMap<InstanceId, MessageFsm>,
    live: HashMap<MessageId, InstanceId>,
    retired: VecDeque<InstanceId>,
    next_instance: u64,
    archive: Option<Archive>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_archive(archive: Archive) -> Self {
        Self {
            archive: Some(archive),
            ..Self::default()
        }
    }

    pub fn archive(&self) -> Option<&Archive> {
        self.archive.as_ref()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.live.contains_key(&id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Builds a state machine for `message` and links it into the live index.
    ///
    /// Fails with `AlreadyExists` without constructing anything if the id is
    /// already live.
    pub(crate) fn allocate(
        &mut self,
        message: CbcMessage,
        mailbox: &WeakMailbox,
        ack_timeout: Duration,
    ) -> Result<InstanceId> {
        let id = message.message_id;
        if self.live.contains_key(&id) {
            warn!(message_id = id, "cannot create message (already exists)");
            return Err(LifecycleError::AlreadyExists { id });
        }

        self.next_instance += 1;
        let instance = InstanceId(self.next_instance);
        let link = ParentLink::new(id, instance, mailbox.clone());
        let fsm = MessageFsm::new(message, link, ack_timeout);
        info!(fsm = fsm.name(), %instance, "message allocated");

        self.instances.insert(instance, fsm);
        self.live.insert(id, instance);
        Ok(instance)
    }

    pub fn find(&self, id: MessageId) -> Option<&MessageFsm> {
        self.live.get(&id).and_then(|i| self.instances.get(i))
    }

    pub fn find_mut(&mut self, id: MessageId) -> Option<&mut MessageFsm> {
        let instance = self.live.get(&id)?;
        self.instances.get_mut(instance)
    }

    pub fn get_mut(&mut self, instance: InstanceId) -> Option<&mut MessageFsm> {
        self.instances.get_mut(&instance)
    }

    pub fn is_retired(&self, instance: InstanceId) -> bool {
        self.retired.contains(&instance)
    }

    /// Moves an instance from the live index to the retired list and records
    /// it in the archive, if one is configured.
    pub fn retire(&mut self, instance: InstanceId) {
        let Some(fsm) = self.instances.get(&instance) else {
            return;
        };
        let id = fsm.message_id();
        if self.live.get(&id) != Some(&instance) {
            return;
        }
        self.live.remove(&id);
        self.retired.push_back(instance);
        info!(fsm = fsm.name(), state = %fsm.state(), "message moved to expired list");

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.record(&RetiredMessage::from_fsm(fsm)) {
                warn!(fsm = fsm.name(), error = %e, "failed to archive retired message");
            }
        }
    }

    /// Unlinks an instance from whichever collection holds it and destroys
    /// it. Peers are terminated first. An operation still attached is handed
    /// back uncompleted.
    pub fn free(&mut self, instance: InstanceId) -> Option<(CbcMessage, Option<PendingOp>)> {
        let mut fsm = self.instances.remove(&instance)?;
        let id = fsm.message_id();
        if self.live.get(&id) == Some(&instance) {
            self.live.remove(&id);
        }
        self.retired.retain(|i| *i != instance);

        let op = fsm.take_pending_op();
        let peers = fsm.terminate_peers();
        info!(fsm = fsm.name(), peers, "message freed");
        Some((fsm.into_message(), op))
    }

    /// Frees retired instances whose retirement is older than `retention`.
    pub fn purge_retired(&mut self, retention: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = chrono::Duration::from_std(retention)
            .map(|d| now - d)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale: Vec<InstanceId> = self
            .retired
            .iter()
            .copied()
            .filter(|i| {
                self.instances
                    .get(i)
                    .and_then(MessageFsm::retired_at)
                    .is_some_and(|at| at <= cutoff)
            })
            .collect();

        for instance in &stale {
            self.free(*instance);
        }
        stale.len()
    }

    /// Live snapshots ordered by message id.
    pub fn live_snapshots(&self) -> Vec<MessageSnapshot> {
        let mut snaps: Vec<MessageSnapshot> = self
            .live
            .values()
            .filter_map(|i| self.instances.get(i))
            .map(MessageFsm::snapshot)
            .collect();
        snaps.sort_by_key(|s| s.message_id);
        snaps
    }

    /// Retired snapshots in retirement order.
    pub fn retired_snapshots(&self) -> Vec<MessageSnapshot> {
        self.retired
            .iter()
            .filter_map(|i| self.instances.get(i))
            .map(MessageFsm::snapshot)
            .collect()
    }

    /// Removes every instance, live first, for shutdown.
    pub fn drain(&mut self) -> Vec<MessageFsm> {
        self.live.clear();
        self.retired.clear();
        let mut all: Vec<MessageFsm> = self.instances.drain().map(|(_, fsm)| fsm).collect();
        all.sort_by_key(|fsm| fsm.instance());
        all
    }
}
