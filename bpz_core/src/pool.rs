use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{BpzError, Result};

/// Unit of work executed by a pool worker.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of long-lived worker threads draining one shared task queue.
///
/// Any idle worker claims the next queued task. Shutdown is drain-complete:
/// closing the queue lets every worker finish what was already submitted
/// before it observes the disconnect and exits.
pub struct WorkerPool {
    size: usize,
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
}

impl WorkerPool {
    /// Spawn `size` worker threads (at least one).
    pub fn start(size: usize) -> Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = unbounded::<Task>();
        let counters = Arc::new(Counters::default());

        let mut workers = Vec::with_capacity(size);
        for worker_id in 0..size {
            let receiver = receiver.clone();
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("bpz-worker-{worker_id}"))
                .spawn(move || run_worker_loop(worker_id, receiver, counters))?;
            workers.push(handle);
        }
        debug!(workers = size, "worker pool started");

        Ok(Self {
            size,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            counters,
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a task for the next idle worker.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(BpzError::PoolClosed)?;
        self.counters.submitted.fetch_add(1, Ordering::AcqRel);
        if sender.send(Box::new(task)).is_err() {
            self.counters.submitted.fetch_sub(1, Ordering::AcqRel);
            return Err(BpzError::PoolClosed);
        }
        Ok(())
    }

    /// Stop accepting tasks, let the queue drain, and join every worker.
    ///
    /// When this returns, every task that was successfully submitted has
    /// finished running. Calling it again is a no-op.
    pub fn shutdown(&self) {
        // Dropping the last sender disconnects the queue once it is empty.
        let closed = self.sender.lock().take().is_some();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        if closed {
            debug!(
                pending = self.submitted().saturating_sub(self.completed()),
                "worker pool shutting down"
            );
        }
        for handle in handles {
            if handle.join().is_err() {
                warn!("worker thread exited abnormally");
            }
        }
    }

    /// Total tasks accepted since start.
    pub fn submitted(&self) -> usize {
        self.counters.submitted.load(Ordering::Acquire)
    }

    /// Total tasks run to completion (including ones that panicked).
    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::Acquire)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker_loop(worker_id: usize, receiver: Receiver<Task>, counters: Arc<Counters>) {
    for task in receiver.iter() {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            warn!(worker_id, "task panicked; worker keeps serving the queue");
        }
        counters.completed.fetch_add(1, Ordering::AcqRel);
    }
}
