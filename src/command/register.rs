//! Correlation register matching asynchronous responses to waiting callers

use crate::error::{status, CommandError, CommandResponse};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const UNREGISTERED: &str = "unregistered correlation id";

/// In-flight task awaiting its response
struct TaskSlot {
    /// Distinguishes a re-registered id from the slot a waiter took
    generation: u64,
    /// Taken by the first completion
    tx: Option<oneshot::Sender<CommandResponse>>,
    /// Taken by the (single) waiter
    rx: Option<oneshot::Receiver<CommandResponse>>,
}

/// Tracks in-flight tasks by correlation id
///
/// The lock only guards map mutation; waiting happens outside of it so the
/// completing side is never blocked by a waiter.
pub struct CorrelationRegister {
    tasks: Mutex<HashMap<String, TaskSlot>>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

impl CorrelationRegister {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            shutdown,
        }
    }

    /// Create a pending slot for `id`
    pub async fn register(&self, id: &str) {
        let (tx, rx) = oneshot::channel();
        let slot = TaskSlot {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            tx: Some(tx),
            rx: Some(rx),
        };
        if self.tasks.lock().await.insert(id.to_string(), slot).is_some() {
            warn!("correlation id {} re-registered, previous waiter is released", id);
        }
    }

    /// Deliver the result for `id`
    ///
    /// Returns false when the id is unknown or already completed; such
    /// completions (late responses, duplicates) are dropped.
    pub async fn complete(&self, id: &str, status: u16, value: Value) -> bool {
        let tx = self
            .tasks
            .lock()
            .await
            .get_mut(id)
            .and_then(|slot| slot.tx.take());

        match tx {
            Some(tx) => tx.send(CommandResponse::new(status, value)).is_ok(),
            None => {
                debug!("ignoring completion for unknown correlation id {}", id);
                false
            }
        }
    }

    /// Wait for the result of `id`, at most `timeout`
    ///
    /// The entry is removed before returning, so each id can be waited on once.
    pub async fn wait_with_timeout(&self, id: &str, timeout: Duration) -> CommandResponse {
        let taken = self
            .tasks
            .lock()
            .await
            .get_mut(id)
            .and_then(|slot| slot.rx.take().map(|rx| (slot.generation, rx)));

        let Some((generation, rx)) = taken else {
            return CommandResponse::new(status::INTERNAL, Value::String(UNREGISTERED.into()));
        };

        let result = tokio::select! {
            outcome = tokio::time::timeout(timeout, rx) => match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(_)) => CommandError::Internal("task completion dropped".into()).into(),
                Err(_) => {
                    debug!("correlation id {} timed out after {:?}", id, timeout);
                    CommandError::Timeout.into()
                }
            },
            _ = self.shutdown.cancelled() => CommandError::ShuttingDown.into(),
        };

        // a re-registration under the same id keeps its own slot
        let mut tasks = self.tasks.lock().await;
        if tasks.get(id).is_some_and(|slot| slot.generation == generation) {
            tasks.remove(id);
        }
        result
    }

    /// Number of tasks not yet consumed by a waiter
    pub async fn pending_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

impl Default for CorrelationRegister {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}
