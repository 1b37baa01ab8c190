//! Thread-safe call queue into the host thread
//!
//! Worker threads never touch the host directly. They push closures onto a
//! FIFO channel which the host loop drains on its own thread, one call at a
//! time, in enqueue order.
//!
//! The queue also tracks *outstanding work*: queued calls plus live
//! [`LoopHold`]s. A host loop keeps running while anything is outstanding.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::context::HostEnv;
use crate::error::{BridgeError, BridgeResult};

/// A call waiting to run on the host thread
pub type QueuedCall = Box<dyn FnOnce(&dyn HostEnv) + Send>;

struct QueueShared {
    outstanding: AtomicUsize,
    host_thread: ThreadId,
}

/// Sending side of the call queue. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct CallQueue {
    sender: Sender<QueuedCall>,
    shared: Arc<QueueShared>,
}

/// Receiving side, owned by the host loop
pub struct CallReceiver {
    receiver: Receiver<QueuedCall>,
    shared: Arc<QueueShared>,
}

/// Create a queue whose host thread is the calling thread
pub fn channel() -> (CallQueue, CallReceiver) {
    let (sender, receiver) = channel::unbounded();
    let shared = Arc::new(QueueShared {
        outstanding: AtomicUsize::new(0),
        host_thread: thread::current().id(),
    });
    (
        CallQueue {
            sender,
            shared: shared.clone(),
        },
        CallReceiver { receiver, shared },
    )
}

impl CallQueue {
    /// Enqueue a call to run on the host thread
    pub fn send(&self, call: impl FnOnce(&dyn HostEnv) + Send + 'static) -> BridgeResult<()> {
        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(Box::new(call)).is_err() {
            self.shared.outstanding.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!("call queue closed, dropping queued call");
            return Err(BridgeError::Host("host loop is no longer running".to_string()));
        }
        Ok(())
    }

    /// Keep the host loop alive until the returned hold is dropped
    pub fn hold(&self) -> LoopHold {
        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        LoopHold {
            shared: self.shared.clone(),
        }
    }

    /// Whether the caller is running on the host thread
    pub fn is_host_thread(&self) -> bool {
        thread::current().id() == self.shared.host_thread
    }

    /// Queued calls plus live holds
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }
}

impl fmt::Debug for CallQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallQueue")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

impl CallReceiver {
    /// Run every call already queued. Returns how many ran.
    pub fn try_dispatch(&self, env: &dyn HostEnv) -> usize {
        let mut ran = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(call) => {
                    self.run(env, call);
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Wait up to `timeout` for one call and run it. Returns whether one ran.
    pub fn dispatch_timeout(&self, env: &dyn HostEnv, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(call) => {
                self.run(env, call);
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Queued calls plus live holds
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    fn run(&self, env: &dyn HostEnv, call: QueuedCall) {
        tracing::trace!("dispatching queued call");
        // Each call gets its own scope; anything it keeps must be referenced.
        env.open_scope();
        call(env);
        env.close_scope();
        self.shared.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Keeps the host loop alive while native work is in flight
pub struct LoopHold {
    shared: Arc<QueueShared>,
}

impl Drop for LoopHold {
    fn drop(&mut self) {
        self.shared.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for LoopHold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LoopHold")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holds_count_as_outstanding() {
        let (queue, receiver) = channel();
        assert_eq!(receiver.outstanding(), 0);

        let hold = queue.hold();
        let second = queue.clone().hold();
        assert_eq!(receiver.outstanding(), 2);

        drop(hold);
        drop(second);
        assert_eq!(receiver.outstanding(), 0);
    }

    #[test]
    fn test_host_thread_detection() {
        let (queue, _receiver) = channel();
        assert!(queue.is_host_thread());

        let remote = queue.clone();
        let on_host = thread::spawn(move || remote.is_host_thread()).join().unwrap();
        assert!(!on_host);
    }

    #[test]
    fn test_send_after_receiver_dropped_fails() {
        let (queue, receiver) = channel();
        drop(receiver);
        assert!(queue.send(|_| {}).is_err());
        assert_eq!(queue.outstanding(), 0);
    }
}
