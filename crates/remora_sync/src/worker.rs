//! One background thread per operation.

use crate::config::ClientConfig;
use crate::dispatch::Dispatch;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread;
use tracing::debug;

fn thread_name(config: &ClientConfig, label: &str) -> String {
    format!("{}-{}", config.worker_name, label)
}

fn guarded<T>(work: impl FnOnce() -> SyncResult<T>) -> SyncResult<T> {
    panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or(Err(SyncError::WorkerLost))
}

/// Runs `work` on a fresh named thread and blocks until it reports.
///
/// With a wait timeout configured, the caller gives up with
/// `WaitAbandoned` once it expires; the worker still runs to completion.
pub(crate) fn run<T, F>(config: &ClientConfig, label: &str, work: F) -> SyncResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> SyncResult<T> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name(thread_name(config, label))
        .spawn(move || {
            // The receiver may be gone after an abandoned wait.
            let _ = tx.send(guarded(work));
        })
        .map_err(|e| SyncError::spawn(e.to_string()))?;

    match config.wait_timeout {
        Some(timeout) => match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                debug!(operation = label, ?timeout, "abandoned wait for worker");
                Err(SyncError::WaitAbandoned)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SyncError::WorkerLost),
        },
        None => rx.recv().unwrap_or(Err(SyncError::WorkerLost)),
    }
}

/// Runs `work` on a fresh named thread and hands its outcome to `deliver`
/// through `dispatch`. `deliver` runs exactly once, also when the thread
/// cannot be started.
pub(crate) fn spawn<T, F, D>(
    config: &ClientConfig,
    label: &str,
    dispatch: Arc<dyn Dispatch>,
    work: F,
    deliver: D,
) where
    T: Send + 'static,
    F: FnOnce() -> SyncResult<T> + Send + 'static,
    D: FnOnce(SyncResult<T>) + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(deliver)));
    let worker_slot = slot.clone();
    let worker_dispatch = dispatch.clone();

    let spawned = thread::Builder::new()
        .name(thread_name(config, label))
        .spawn(move || {
            let outcome = guarded(work);
            if let Some(deliver) = worker_slot.lock().take() {
                worker_dispatch.dispatch(Box::new(move || deliver(outcome)));
            }
        });

    if let Err(e) = spawned {
        let error = SyncError::spawn(e.to_string());
        if let Some(deliver) = slot.lock().take() {
            dispatch.dispatch(Box::new(move || deliver(Err(error))));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{InlineDispatcher, QueueDispatcher};
    use std::time::Duration;

    #[test]
    fn run_returns_outcome() {
        let config = ClientConfig::new();
        assert_eq!(run(&config, "t", || Ok(7)).unwrap(), 7);
        assert_eq!(
            run::<(), _>(&config, "t", || Err(SyncError::NotPersisted)).unwrap_err(),
            SyncError::NotPersisted
        );
    }

    #[test]
    fn run_uses_named_thread() {
        let config = ClientConfig::new().with_worker_name("test-worker");
        let name = run(&config, "fetch", || {
            Ok(thread::current().name().map(str::to_string))
        })
        .unwrap();
        assert_eq!(name.as_deref(), Some("test-worker-fetch"));
    }

    #[test]
    fn panics_become_worker_lost() {
        let config = ClientConfig::new();
        let outcome = run::<(), _>(&config, "t", || panic!("boom"));
        assert_eq!(outcome.unwrap_err(), SyncError::WorkerLost);
    }

    #[test]
    fn wait_timeout_abandons() {
        let config = ClientConfig::new().with_wait_timeout(Duration::from_millis(10));
        let outcome = run(&config, "slow", || {
            thread::sleep(Duration::from_millis(200));
            Ok(())
        });
        assert_eq!(outcome.unwrap_err(), SyncError::WaitAbandoned);
    }

    #[test]
    fn spawn_delivers_through_dispatcher() {
        let config = ClientConfig::new();
        let queue = Arc::new(QueueDispatcher::new());
        let (tx, rx) = mpsc::channel();
        spawn(&config, "t", queue.clone(), || Ok(3), move |outcome| {
            tx.send(outcome).unwrap();
        });

        assert!(queue.run_one(Duration::from_secs(5)));
        assert_eq!(rx.try_recv().unwrap().unwrap(), 3);
    }

    #[test]
    fn spawn_reports_panics() {
        let config = ClientConfig::new();
        let (tx, rx) = mpsc::channel();
        spawn::<(), _, _>(
            &config,
            "t",
            Arc::new(InlineDispatcher),
            || panic!("boom"),
            move |outcome| tx.send(outcome).unwrap(),
        );
        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.unwrap_err(), SyncError::WorkerLost);
    }
}
