//! Retired-message archive backed by `sled`.
//!
//! Records are stored in a single tree keyed by retirement time (ms, big
//! endian) followed by the message id, so iteration yields them in
//! chronological order and TTL cleanup can stop at the first fresh key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::Db;

use crate::lifecycle::{MessageFsm, MessageState};
use crate::message::{CbcMessage, MessageId};
use crate::utils::Result;

const RETIRED_TREE: &str = "retired";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetiredMessage {
    pub message_id: MessageId,
    pub cbe_name: String,
    pub final_state: MessageState,
    pub message: CbcMessage,
    pub created_at: DateTime<Utc>,
    pub retired_at: DateTime<Utc>,
}

impl RetiredMessage {
    pub fn from_fsm(fsm: &MessageFsm) -> Self {
        Self {
            message_id: fsm.message_id(),
            cbe_name: fsm.message().cbe_name.clone(),
            final_state: fsm.state(),
            message: fsm.message().clone(),
            created_at: fsm.created_at(),
            retired_at: fsm.retired_at().unwrap_or_else(Utc::now),
        }
    }

    fn key(&self) -> [u8; 10] {
        let mut key = [0u8; 10];
        key[..8].copy_from_slice(&self.retired_at.timestamp_millis().to_be_bytes());
        key[8..].copy_from_slice(&self.message_id.to_be_bytes());
        key
    }
}

#[derive(Clone)]
pub struct Archive {
    db: Db,
    ttl_seconds: Option<i64>,
}

impl Archive {
    /// Open or create a sled database at `path`.
    pub fn open(path: &str, ttl_seconds: Option<i64>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db, ttl_seconds })
    }

    pub fn record(&self, msg: &RetiredMessage) -> Result<()> {
        let serialized = serde_json::to_vec(msg)?;
        let tree = self.db.open_tree(RETIRED_TREE)?;
        tree.insert(msg.key(), serialized)?;
        Ok(())
    }

    /// Loads all records, oldest first, after dropping expired ones.
    pub fn load(&self) -> Result<Vec<RetiredMessage>> {
        self.cleanup_old_records()?;
        let tree = self.db.open_tree(RETIRED_TREE)?;
        let records = tree
            .iter()
            .filter_map(|res| res.ok())
            .filter_map(|(_, val)| serde_json::from_slice(&val).ok())
            .collect();
        Ok(records)
    }

    /// Records for one message id, oldest first.
    pub fn load_for(&self, id: MessageId) -> Result<Vec<RetiredMessage>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|r| r.message_id == id)
            .collect())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn cleanup_old_records(&self) -> Result<usize> {
        let Some(ttl) = self.ttl_seconds else {
            return Ok(0);
        };
        let expiry_time = Utc::now().timestamp_millis() - ttl * 1000;

        let tree = self.db.open_tree(RETIRED_TREE)?;
        let old_keys: Vec<_> = tree
            .iter()
            .filter_map(|res| res.ok())
            .map(|(key, _)| key)
            .take_while(|key| {
                key.len() == 10
                    && <[u8; 8]>::try_from(&key[..8])
                        .map(i64::from_be_bytes)
                        .is_ok_and(|ts| ts < expiry_time)
            })
            .collect();

        let removed = old_keys.len();
        for key in old_keys {
            tree.remove(key)?;
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("db", &"sled::Db")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}
