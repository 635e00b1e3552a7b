//! Single reload worker.
//!
//! Reload jobs run on one dedicated thread, never on the observer, so a slow
//! reload cannot back up the event queue. Jobs run in submission order.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::error::WatchError;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

enum Task {
    Run(Job),
    Stop,
}

pub struct ReloadScheduler {
    tasks: Sender<Task>,
    finished: Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    delay: Duration,
    stopped: AtomicBool,
}

impl ReloadScheduler {
    /// Spawn the worker. `delay` is the settle time jobs wait before reading.
    pub fn start(delay: Duration) -> Result<Self, WatchError> {
        let (tasks, rx) = crossbeam_channel::unbounded();
        let (done_tx, finished) = crossbeam_channel::bounded(1);

        let worker = thread::Builder::new()
            .name("confkit-reload".to_string())
            .spawn(move || {
                work(rx);
                let _ = done_tx.send(());
            })
            .map_err(|e| WatchError::SpawnFailed {
                thread: "reload worker",
                reason: e.to_string(),
            })?;

        Ok(Self {
            tasks,
            finished,
            worker_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
            delay,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), WatchError> {
        if self.is_stopped() {
            return Err(WatchError::ChannelClosed);
        }
        self.tasks
            .send(Task::Run(Box::new(job)))
            .map_err(|_| WatchError::ChannelClosed)
    }

    /// Ask the worker to stop after queued jobs and wait up to `grace`.
    ///
    /// Returns `false` when the worker was still busy when the grace period
    /// ran out; it is then left to finish on its own.
    pub fn shutdown(&self, grace: Duration) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return true;
        }
        let _ = self.tasks.send(Task::Stop);

        if self.is_worker_thread() {
            return false;
        }
        let Some(handle) = self.worker.lock().take() else {
            return true;
        };
        match self.finished.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    tracing::error!("[scheduler] reload worker panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "[scheduler] reload still running after {}ms, detaching",
                    grace.as_millis()
                );
                false
            }
        }
    }
}

impl Drop for ReloadScheduler {
    fn drop(&mut self) {
        self.shutdown(Duration::ZERO);
    }
}

fn work(rx: Receiver<Task>) {
    for task in rx.iter() {
        match task {
            Task::Stop => break,
            Task::Run(job) => {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("[scheduler] reload job panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_jobs_run_in_order_off_thread() {
        let scheduler = ReloadScheduler::start(Duration::ZERO).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let caller = thread::current().id();

        for i in 0..3 {
            let tx = tx.clone();
            scheduler
                .submit(move || {
                    assert_ne!(thread::current().id(), caller);
                    tx.send(i).unwrap();
                })
                .unwrap();
        }

        let got: Vec<i32> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(got, vec![0, 1, 2]);
        assert!(scheduler.shutdown(Duration::from_secs(2)));
    }

    #[test]
    fn test_shutdown_finishes_queued_work() {
        let scheduler = ReloadScheduler::start(Duration::ZERO).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let count = count.clone();
            scheduler
                .submit(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        assert!(scheduler.shutdown(Duration::from_secs(2)));
        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert!(scheduler.submit(|| {}).is_err());
    }

    #[test]
    fn test_grace_period_is_bounded() {
        let scheduler = ReloadScheduler::start(Duration::ZERO).unwrap();
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        scheduler
            .submit(move || {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
            })
            .unwrap();

        assert!(!scheduler.shutdown(Duration::from_millis(50)));
        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let scheduler = ReloadScheduler::start(Duration::ZERO).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        scheduler.submit(|| panic!("boom")).unwrap();
        scheduler.submit(move || tx.send(()).unwrap()).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
