//! Serial FIFO operation queue.
//!
//! Operations run one at a time on a dedicated tokio task and have exclusive
//! access to the queue-owned state `S`. Chained operations hand data to each
//! other through [`Slot`]s; a failing producer cancels its dependents through
//! their [`CancelFlag`]s, and cancelled operations are skipped.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Cooperative cancellation flag shared between an operation and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an uncancelled flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the operation cancelled.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once [`Self::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Single-value hand-off cell between chained operations.
pub type Slot<T> = Arc<Mutex<Option<T>>>;

/// Creates an empty [`Slot`].
pub fn slot<T>() -> Slot<T> {
    Arc::new(Mutex::new(None))
}

/// A unit of work executed on the serial queue.
#[async_trait]
pub trait QueueOperation<S: Send>: Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Runs the operation with exclusive access to the queue state.
    async fn run(&mut self, state: &mut S);
}

struct Queued<S> {
    op: Box<dyn QueueOperation<S>>,
    cancel: CancelFlag,
}

/// FIFO queue executing operations one at a time.
pub struct SerialQueue<S: Send + 'static> {
    sender: mpsc::UnboundedSender<Queued<S>>,
    worker: JoinHandle<S>,
}

impl<S: Send + 'static> SerialQueue<S> {
    /// Spawns the worker task. Must be called inside a tokio runtime.
    pub fn spawn(mut state: S) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Queued<S>>();
        let worker = tokio::spawn(async move {
            while let Some(Queued { mut op, cancel }) = receiver.recv().await {
                if cancel.is_cancelled() {
                    debug!(op = op.name(), "skipping cancelled operation");
                    continue;
                }
                trace!(op = op.name(), "running operation");
                op.run(&mut state).await;
            }
            state
        });
        Self { sender, worker }
    }

    /// Enqueues an operation with a fresh cancel flag.
    pub fn enqueue<O>(&self, op: O) -> SyncResult<CancelFlag>
    where
        O: QueueOperation<S> + 'static,
    {
        let cancel = CancelFlag::new();
        self.enqueue_with(op, cancel.clone())?;
        Ok(cancel)
    }

    /// Enqueues an operation sharing an existing cancel flag.
    pub fn enqueue_with<O>(&self, op: O, cancel: CancelFlag) -> SyncResult<()>
    where
        O: QueueOperation<S> + 'static,
    {
        self.sender
            .send(Queued {
                op: Box::new(op),
                cancel,
            })
            .map_err(|_| SyncError::QueueClosed)
    }

    /// Stops accepting operations, drains the ones already queued and
    /// returns the final state.
    pub async fn close(self) -> SyncResult<S> {
        drop(self.sender);
        self.worker.await.map_err(|_| SyncError::QueueClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Push(u32);

    #[async_trait]
    impl QueueOperation<Vec<u32>> for Push {
        fn name(&self) -> &'static str {
            "push"
        }

        async fn run(&mut self, state: &mut Vec<u32>) {
            tokio::task::yield_now().await;
            state.push(self.0);
        }
    }

    struct Produce {
        out: Slot<u32>,
        fail: bool,
        dependents: CancelFlag,
    }

    #[async_trait]
    impl QueueOperation<Vec<u32>> for Produce {
        fn name(&self) -> &'static str {
            "produce"
        }

        async fn run(&mut self, _state: &mut Vec<u32>) {
            if self.fail {
                self.dependents.cancel();
            } else {
                *self.out.lock() = Some(42);
            }
        }
    }

    struct Consume(Slot<u32>);

    #[async_trait]
    impl QueueOperation<Vec<u32>> for Consume {
        fn name(&self) -> &'static str {
            "consume"
        }

        async fn run(&mut self, state: &mut Vec<u32>) {
            if let Some(value) = self.0.lock().take() {
                state.push(value);
            }
        }
    }

    #[tokio::test]
    async fn runs_in_fifo_order() {
        let queue = SerialQueue::spawn(Vec::new());
        for i in 0..10 {
            queue.enqueue(Push(i)).unwrap();
        }
        let state = queue.close().await.unwrap();
        assert_eq!(state, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn cancelled_operations_are_skipped() {
        let queue = SerialQueue::spawn(Vec::new());
        let flag = CancelFlag::new();
        flag.cancel();
        queue.enqueue_with(Push(1), flag).unwrap();
        queue.enqueue(Push(2)).unwrap();
        assert_eq!(queue.close().await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn chained_operations_pass_data_through_slots() {
        let queue = SerialQueue::spawn(Vec::new());
        let out = slot();
        let dependents = CancelFlag::new();
        queue
            .enqueue(Produce {
                out: out.clone(),
                fail: false,
                dependents: dependents.clone(),
            })
            .unwrap();
        queue.enqueue_with(Consume(out), dependents).unwrap();
        assert_eq!(queue.close().await.unwrap(), vec![42]);
    }

    #[tokio::test]
    async fn failing_producer_cancels_dependents() {
        let queue = SerialQueue::spawn(Vec::new());
        let out = slot();
        let dependents = CancelFlag::new();
        queue
            .enqueue(Produce {
                out: out.clone(),
                fail: true,
                dependents: dependents.clone(),
            })
            .unwrap();
        queue.enqueue_with(Push(7), dependents.clone()).unwrap();
        queue.enqueue(Push(8)).unwrap();
        assert_eq!(queue.close().await.unwrap(), vec![8]);
        assert!(dependents.is_cancelled());
    }
}
