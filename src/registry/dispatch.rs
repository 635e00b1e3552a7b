//! Hand-off of change notifications to the host's main thread.

use std::thread::{self, ThreadId};

use crossbeam_channel::{Receiver, Sender};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs change listeners in the host's single-threaded context.
pub trait MainThreadDispatcher: Send + Sync {
    fn run_on_main(&self, task: Task);

    /// Blocking I/O from this thread is reported with a warning.
    fn is_main_thread(&self) -> bool {
        false
    }
}

/// Runs tasks immediately on the calling thread. Used when the host has no
/// main-thread constraint.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl MainThreadDispatcher for InlineDispatcher {
    fn run_on_main(&self, task: Task) {
        task();
    }
}

/// Queues tasks until the host pumps them with [`QueueDispatcher::run_pending`].
///
/// The thread that creates the dispatcher is treated as the main thread.
pub struct QueueDispatcher {
    tx: Sender<Task>,
    rx: Receiver<Task>,
    main: ThreadId,
}

impl QueueDispatcher {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            main: thread::current().id(),
        }
    }

    /// Run every queued task on the calling thread. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Default for QueueDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MainThreadDispatcher for QueueDispatcher {
    fn run_on_main(&self, task: Task) {
        if self.tx.send(task).is_err() {
            tracing::warn!("[dispatch] main-thread queue closed, dropping notification");
        }
    }

    fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_queue_defers_until_pumped() {
        let dispatcher = QueueDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = hits.clone();
            dispatcher.run_on_main(Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.pending(), 3);

        assert_eq!(dispatcher.run_pending(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_main_thread_is_creator() {
        let dispatcher = Arc::new(QueueDispatcher::new());
        assert!(dispatcher.is_main_thread());

        let remote = dispatcher.clone();
        let on_other = std::thread::spawn(move || remote.is_main_thread())
            .join()
            .unwrap();
        assert!(!on_other);
    }

    #[test]
    fn test_inline_runs_now() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        InlineDispatcher.run_on_main(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!InlineDispatcher.is_main_thread());
    }
}
