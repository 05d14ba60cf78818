//! Single sequential worker for work requested from native upcalls.
//!
//! Tasks run one at a time, in submission order, on a dedicated thread. No result flows back
//! to the submitter; each task forwards its own output.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Task {
    label: &'static str,
    job: Job,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("executor has shut down")]
    ShutDown,
    #[error("failed to spawn executor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub struct AsyncExecutor {
    tx: Option<mpsc::UnboundedSender<Task>>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncExecutor {
    pub fn new() -> Result<Self, ExecutorError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let worker = thread::Builder::new()
            .name("tring-executor".to_string())
            .spawn(move || {
                while let Some(Task { label, job }) = rx.blocking_recv() {
                    debug!(task = label, "running task");
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(task = label, "task panicked");
                    }
                }
                debug!("executor worker exiting");
            })?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Queue `job` behind everything submitted so far.
    pub fn submit<F>(&self, label: &'static str, job: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        let tx = self.tx.as_ref().ok_or(ExecutorError::ShutDown)?;
        tx.send(Task {
            label,
            job: Box::new(job),
        })
        .map_err(|_| ExecutorError::ShutDown)?;
        debug!(task = label, "task submitted");
        Ok(())
    }

    /// Block until every task submitted before this call has run. False on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        if self
            .submit("flush", move || {
                let _ = done_tx.send(());
            })
            .is_err()
        {
            return false;
        }
        done_rx.recv_timeout(timeout).is_ok()
    }
}

impl Drop for AsyncExecutor {
    /// Closes the queue; queued tasks still run before the worker exits.
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            // A task holding the last reference cannot join its own thread.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}
