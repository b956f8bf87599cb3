//! Serialized task queue.
//!
//! [`SerialQueue`] runs asynchronous operations one at a time per logical key,
//! in the order they were submitted. Operations under different keys run
//! independently.
//!
//! Each key owns a chain of completion signals. Submitting an operation swaps
//! the tail of the chain for a fresh signal and the operation waits for the
//! previous tail before starting, so the FIFO slot is reserved at call time
//! rather than at first poll.
//!
//! The queue is process local. It gives no exclusion across processes; a
//! deployment with more than one orchestrator needs an external lease service
//! behind the same `enqueue(key, operation)` contract.

use std::collections::HashMap;
use std::future::Future;
use std::panic;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tracing::trace;

#[derive(Default)]
struct Lane {
    /// Completion signal of the most recently submitted operation.
    tail: Option<oneshot::Receiver<()>>,

    /// Ticket of the most recently submitted operation.
    ticket: u64,
}

type Lanes = Arc<Mutex<HashMap<String, Lane>>>;

/// Per-key FIFO execution of asynchronous operations.
#[derive(Clone, Default)]
pub struct SerialQueue {
    lanes: Lanes,
}

impl SerialQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit `operation` under `key`.
    ///
    /// The operation starts once every operation previously submitted under
    /// the same key has finished, successfully or not. The returned future
    /// resolves to exactly what the operation produced. The operation runs on
    /// the tokio runtime, so dropping the returned future does not cancel it
    /// and does not hold up later operations on the key.
    ///
    /// A panicking operation releases its slot and the panic is resumed in
    /// whoever awaits the returned future.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue<F, Fut, T>(
        &self,
        key: &str,
        operation: F,
    ) -> impl Future<Output = T> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();

        let (ticket, previous) = {
            let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
            let lane = lanes.entry(key.to_owned()).or_default();
            lane.ticket += 1;
            (lane.ticket, lane.tail.replace(done_rx))
        };

        let release = Release {
            lanes: Arc::clone(&self.lanes),
            key: key.to_owned(),
            ticket,
            done: Some(done_tx),
        };

        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                // A closed channel means the previous holder is gone as well.
                let _ = previous.await;
            }
            trace!(key = %release.key, ticket, "Entering critical section");
            let _release = release;
            operation().await
        });

        async move {
            match task.await {
                Ok(output) => output,
                Err(e) => match e.try_into_panic() {
                    Ok(payload) => panic::resume_unwind(payload),
                    // Tasks are never aborted. Runtime shutdown cancels them,
                    // but it drops this waiter along with them.
                    Err(e) => unreachable!("serial queue task cancelled: {e}"),
                },
            }
        }
    }

    /// Returns true when nothing is queued or running under `key`.
    pub fn is_idle(&self, key: &str) -> bool {
        let lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        !lanes.contains_key(key)
    }
}

/// Hands the key to the next operation when dropped.
struct Release {
    lanes: Lanes,
    key: String,
    ticket: u64,
    done: Option<oneshot::Sender<()>>,
}

impl Drop for Release {
    fn drop(&mut self) {
        {
            let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
            if lanes.get(&self.key).is_some_and(|lane| lane.ticket == self.ticket) {
                lanes.remove(&self.key);
            }
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
        trace!(key = %self.key, ticket = self.ticket, "Left critical section");
    }
}
