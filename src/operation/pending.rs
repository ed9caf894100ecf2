use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::utils::{LifecycleError, Result};

/// HTTP-style outcome reported back to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpResult {
    pub code: u16,
    pub text: String,
}

impl OpResult {
    pub fn new(code: u16, text: &str) -> Self {
        Self {
            code,
            text: text.to_string(),
        }
    }

    pub fn created() -> Self {
        Self::new(201, "Created")
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    fn unset() -> Self {
        Self::new(500, "No result")
    }
}

/// Caller-facing token for one in-flight lifecycle step.
///
/// `complete` and `reject` take `self`, so an op can be released only once.
#[derive(Debug)]
pub struct PendingOp {
    id: Uuid,
    result: Option<OpResult>,
    reply: oneshot::Sender<Result<OpResult>>,
}

impl PendingOp {
    pub fn new() -> (Self, OpWaiter) {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        (
            Self {
                id,
                result: None,
                reply: tx,
            },
            OpWaiter { id, rx },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn set_result(&mut self, code: u16, text: &str) {
        self.result = Some(OpResult::new(code, text));
    }

    pub fn result(&self) -> Option<&OpResult> {
        self.result.as_ref()
    }

    /// Releases the op to its caller with whatever result was set.
    pub fn complete(self) {
        let result = self.result.unwrap_or_else(OpResult::unset);
        if self.reply.send(Ok(result)).is_err() {
            tracing::debug!(op = %self.id, "requester went away before completion");
        }
    }

    pub fn reject(self, err: LifecycleError) {
        tracing::debug!(op = %self.id, error = err.as_label(), "operation rejected");
        let _ = self.reply.send(Err(err));
    }
}

/// Receiving half of a [`PendingOp`].
#[derive(Debug)]
pub struct OpWaiter {
    id: Uuid,
    rx: oneshot::Receiver<Result<OpResult>>,
}

impl OpWaiter {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits until the op is completed or rejected. A dropped op means the
    /// orchestrator is gone.
    pub async fn wait(self) -> Result<OpResult> {
        self.rx.await.unwrap_or(Err(LifecycleError::Shutdown))
    }

    /// Non-blocking check; `None` while the op is still pending.
    pub fn try_result(&mut self) -> Option<Result<OpResult>> {
        match self.rx.try_recv() {
            Ok(res) => Some(res),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(LifecycleError::Shutdown)),
        }
    }
}
