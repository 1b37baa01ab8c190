//! Worker threads for async native function bodies

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};

use crate::error::{BridgeError, BridgeResult};

type Job = Box<dyn FnOnce() + Send>;

/// Fixed-size pool of named worker threads fed from one FIFO channel.
///
/// Dropping the pool closes the channel and joins every worker once the
/// queued jobs have run.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    completed: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawn `threads` workers named `"{name}-{i}"`
    pub fn new(threads: usize, name: &str) -> BridgeResult<Self> {
        let (sender, receiver) = channel::unbounded::<Job>();
        let completed = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::with_capacity(threads.max(1));

        for i in 0..threads.max(1) {
            let rx = receiver.clone();
            let done = completed.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                        done.fetch_add(1, Ordering::AcqRel);
                    }
                })
                .map_err(|e| BridgeError::Native(format!("failed to spawn worker thread: {}", e)))?;
            workers.push(handle);
        }

        tracing::debug!(threads = workers.len(), name, "worker pool started");
        Ok(Self {
            sender: Some(sender),
            workers,
            completed,
        })
    }

    /// Queue a job
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> BridgeResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| BridgeError::Native("worker pool is shut down".to_string()))?;
        sender
            .send(Box::new(job))
            .map_err(|_| BridgeError::Native("worker pool is shut down".to_string()))
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Number of jobs that have finished running
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            // The last bridge reference can be released by a job on a worker.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }
}
