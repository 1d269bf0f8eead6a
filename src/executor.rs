//! Ordered parallel execution.
//!
//! Compressed root entries are independent of each other, so they can be
//! inflated (on read) or deflated (on write) on a rayon pool. Results must
//! still surface in file order. [`OrderedQueue`] holds one [`Slot`] per entry
//! in submission order and drains them front to back, blocking on slots whose
//! worker has not finished yet.
//!
//! Error handling follows a "first error wins" rule by slot order: the drain
//! keeps collecting every slot so no worker outlives the call, then reports
//! the earliest failure. Once a failure is seen, workers that have not
//! started yet skip their job.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};

use rayon::ThreadPool;

use crate::error::{MatError, Result};

/// One entry's result, either computed inline or owed by a worker.
#[derive(Debug)]
pub(crate) enum Slot<T> {
    Ready(T),
    Pending(Receiver<Result<T>>),
}

impl<T> Slot<T> {
    fn wait(self) -> Result<T> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::Pending(rx) => rx
                .recv()
                .map_err(|_| MatError::Internal("worker dropped its result".into()))?,
        }
    }
}

/// FIFO of slots drained in submission order.
#[derive(Debug)]
pub(crate) struct OrderedQueue<T> {
    slots: VecDeque<Slot<T>>,
    abort: Arc<AtomicBool>,
}

impl<T: Send + 'static> OrderedQueue<T> {
    pub(crate) fn new() -> Self {
        Self { slots: VecDeque::new(), abort: Arc::new(AtomicBool::new(false)) }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Queues a value computed on the calling thread.
    pub(crate) fn push_ready(&mut self, value: T) {
        self.slots.push_back(Slot::Ready(value));
    }

    /// Runs `job` on `pool` and queues its eventual result.
    pub(crate) fn spawn<F>(&mut self, pool: &ThreadPool, job: F)
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let abort = Arc::clone(&self.abort);
        pool.spawn(move || {
            let result = if abort.load(Ordering::Relaxed) {
                Err(MatError::Internal("skipped after an earlier failure".into()))
            } else {
                job()
            };
            // The receiver is gone only if the queue was dropped mid-drain.
            let _ = tx.send(result);
        });
        self.slots.push_back(Slot::Pending(rx));
    }

    /// Pops the front slot if its result is available without blocking.
    pub(crate) fn try_pop(&mut self) -> Option<Result<T>> {
        let front = self.slots.front()?;
        let result = match front {
            Slot::Ready(_) => None,
            Slot::Pending(rx) => match rx.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    Some(Err(MatError::Internal("worker dropped its result".into())))
                }
            },
        };
        let slot = self.slots.pop_front()?;
        let result = match (result, slot) {
            (Some(result), _) => result,
            (None, slot) => slot.wait(),
        };
        if result.is_err() {
            self.abort.store(true, Ordering::SeqCst);
        }
        Some(result)
    }

    /// Waits for every slot in order, handing each value to `commit`.
    ///
    /// After the first failure (from a worker or from `commit`) the remaining
    /// slots are still awaited but no longer committed.
    pub(crate) fn drain<F>(&mut self, mut commit: F) -> Result<()>
    where
        F: FnMut(T) -> Result<()>,
    {
        let mut first_error: Option<MatError> = None;
        while let Some(slot) = self.slots.pop_front() {
            let outcome = slot.wait().and_then(|value| match first_error {
                None => commit(value),
                Some(_) => Ok(()),
            });
            if let Err(e) = outcome
                && first_error.is_none()
            {
                self.abort.store(true, Ordering::SeqCst);
                first_error = Some(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Builds a pool with `threads` workers.
pub(crate) fn build_pool(threads: usize) -> Result<Arc<ThreadPool>> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("mat5-worker-{i}"))
        .build()
        .map(Arc::new)
        .map_err(|e| MatError::Internal(format!("cannot build thread pool: {e}")))
}
