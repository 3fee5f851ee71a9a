//! Delivery of completion callbacks to a host-chosen context.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// A unit of work handed to a dispatcher.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs completion callbacks on the host's chosen execution context.
///
/// Every job passed to `dispatch` must run exactly once, some time after
/// the call.
pub trait Dispatch: Send + Sync {
    /// Schedules a job.
    fn dispatch(&self, job: Job);
}

/// Runs jobs immediately on the thread that completed the operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatch for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Collects jobs until the host drains them, typically from its main loop.
#[derive(Default)]
pub struct QueueDispatcher {
    queue: Mutex<VecDeque<Job>>,
    ready: Condvar,
}

impl QueueDispatcher {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs every queued job on the calling thread and returns how many ran.
    /// Jobs queued while draining run in the same call.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Some(job) = self.pop() {
            job();
            ran += 1;
        }
        ran
    }

    /// Waits up to `timeout` for one job and runs it.
    ///
    /// Returns false if nothing arrived in time.
    pub fn run_one(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock();
        while queue.is_empty() {
            if self.ready.wait_until(&mut queue, deadline).timed_out() {
                break;
            }
        }
        let job = queue.pop_front();
        drop(queue);
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Runs jobs as they arrive until `count` have run or `timeout` passes.
    /// Returns how many ran.
    pub fn run_until(&self, count: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut ran = 0;
        while ran < count {
            let left = deadline.saturating_duration_since(Instant::now());
            if !self.run_one(left) {
                break;
            }
            ran += 1;
        }
        ran
    }

    fn pop(&self) -> Option<Job> {
        self.queue.lock().pop_front()
    }
}

impl Dispatch for QueueDispatcher {
    fn dispatch(&self, job: Job) {
        self.queue.lock().push_back(job);
        self.ready.notify_one();
    }
}

impl fmt::Debug for QueueDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueDispatcher")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Runs jobs as blocking tasks on a tokio runtime.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone)]
pub struct TokioDispatcher {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "tokio")]
impl TokioDispatcher {
    /// Dispatches onto the given runtime.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Dispatches onto the runtime of the calling context.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

#[cfg(feature = "tokio")]
impl Dispatch for TokioDispatcher {
    fn dispatch(&self, job: Job) {
        // Callbacks may block; keep them off the async workers.
        drop(self.handle.spawn_blocking(job));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn inline_runs_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        InlineDispatcher.dispatch(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queue_defers_until_drained() {
        let queue = QueueDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let h = hits.clone();
            queue.dispatch(Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending(), 3);
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(queue.run_pending(), 0);
    }

    #[test]
    fn queue_waits_for_other_threads() {
        let queue = Arc::new(QueueDispatcher::new());
        let q = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            q.dispatch(Box::new(|| {}));
        });
        assert!(queue.run_one(Duration::from_secs(5)));
        handle.join().unwrap();
        assert!(!queue.run_one(Duration::from_millis(10)));
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn tokio_runs_jobs_on_the_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let dispatcher = TokioDispatcher::new(runtime.handle().clone());
        let (tx, rx) = std::sync::mpsc::channel();
        dispatcher.dispatch(Box::new(move || {
            tx.send(std::thread::current().id()).unwrap();
        }));
        let ran_on = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(ran_on, std::thread::current().id());
    }
}
