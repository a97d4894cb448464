//! Task offload bridge.
//!
//! Handlers must not run long synchronous CPU work on the request path; they
//! hand it to the bridge instead. A [`TaskUnit`] is a serializable work
//! descriptor; the bridge moves it to one of the task workers round-robin.
//! Dispatch is fire-and-forget unless the caller asks to await the
//! correlated result, which travels back on the bridge's own reply channel,
//! never through the request-context store, which task workers (separate
//! execution contexts) must not touch. A task result bound for a live
//! connection is routed by looking the connection up in the shared binding
//! table instead.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::bail;
use arc_swap::ArcSwap;
use may::sync::mpsc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

/// Serializable work descriptor handed from a request coroutine to a task
/// worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskUnit {
    /// Correlation id, unique per process.
    pub id: u64,
    /// Application-defined task kind.
    pub kind: String,
    pub payload: Value,
}

/// In-process envelope wrapping a unit with its optional reply channel.
pub struct TaskEnvelope {
    pub unit: TaskUnit,
    pub reply_tx: Option<mpsc::Sender<Option<Value>>>,
}

/// Hands work from request coroutines to the task-worker pool.
pub struct TaskBridge {
    senders: ArcSwap<Vec<mpsc::Sender<TaskEnvelope>>>,
    next_worker: AtomicUsize,
    next_id: AtomicU64,
}

impl Default for TaskBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBridge {
    pub fn new() -> Self {
        Self {
            senders: ArcSwap::from_pointee(Vec::new()),
            next_worker: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
        }
    }

    /// Swap in a new task-worker generation. Old workers drain their queues
    /// and exit when their channel closes.
    pub(crate) fn replace_workers(&self, senders: Vec<mpsc::Sender<TaskEnvelope>>) {
        self.senders.store(Arc::new(senders));
    }

    /// Build a unit with a fresh correlation id.
    pub fn new_unit(&self, kind: &str, payload: Value) -> TaskUnit {
        TaskUnit {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            kind: kind.to_string(),
            payload,
        }
    }

    fn send(&self, envelope: TaskEnvelope) -> anyhow::Result<()> {
        let senders = self.senders.load();
        if senders.is_empty() {
            bail!("no task workers available");
        }
        let idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % senders.len();
        let task_id = envelope.unit.id;
        if senders[idx].send(envelope).is_err() {
            error!(task_id, worker_idx = idx, "Task worker channel closed");
            bail!("task worker unavailable");
        }
        debug!(task_id, worker_idx = idx, "Task dispatched");
        Ok(())
    }

    /// Fire-and-forget dispatch; the calling coroutine does not block.
    ///
    /// # Errors
    ///
    /// Fails when no task worker is available to take the unit.
    pub fn dispatch(&self, unit: TaskUnit) -> anyhow::Result<()> {
        self.send(TaskEnvelope {
            unit,
            reply_tx: None,
        })
    }

    /// Dispatch and block the calling coroutine until the correlated result
    /// comes back on the bridge's reply channel.
    ///
    /// # Errors
    ///
    /// Fails when no worker is available or the executing worker died before
    /// replying.
    pub fn dispatch_wait(&self, unit: TaskUnit) -> anyhow::Result<Option<Value>> {
        let task_id = unit.id;
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(TaskEnvelope {
            unit,
            reply_tx: Some(reply_tx),
        })?;
        match reply_rx.recv() {
            Ok(result) => Ok(result),
            Err(_) => bail!("task {task_id} dropped without a result"),
        }
    }
}
