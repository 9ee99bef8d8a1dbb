//! Cross-thread task dispatch
//!
//! Background tasks (discovery listener, socket readers) hand work to the
//! one thread that owns simulation and UI state. The owning thread drains
//! the queue once per tick; nothing else touches shared state directly.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};

type Task = Box<dyn FnOnce() + Send>;

/// FIFO task queue, drained once per tick by the owning thread.
///
/// One instance per running session. Whatever owns the tick loop creates it
/// at startup and hands an `Arc` clone to each background task.
pub struct Dispatcher {
    queue: Mutex<Vec<Task>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Queue a task for the next drain. Callable from any thread; blocks
    /// only for the lock.
    pub fn enqueue(&self, task: impl FnOnce() + Send + 'static) {
        self.lock().push(Box::new(task));
    }

    /// Execute queued tasks in enqueue order.
    ///
    /// A panicking task is logged and skipped; the rest of the batch still
    /// runs. Tasks enqueued while draining run on the next drain.
    pub fn drain(&self) {
        let batch = std::mem::take(&mut *self.lock());
        for task in batch {
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                tracing::error!("dispatched task panicked, continuing with batch");
            }
        }
    }

    /// Drop pending tasks without executing them. Teardown only.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    // Tasks never run under the lock, so a poisoned mutex only means some
    // thread died between push/len calls; the queue itself is still sound.
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Task>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_drain_runs_in_enqueue_order() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            let seen = seen.clone();
            dispatcher.enqueue(move || seen.lock().unwrap().push(i));
        }
        dispatcher.drain();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_enqueue_from_other_thread() {
        let dispatcher = Arc::new(Dispatcher::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                let hits = hits.clone();
                std::thread::spawn(move || {
                    dispatcher.enqueue(move || {
                        hits.fetch_add(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        dispatcher.drain();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_task_does_not_stop_batch() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        dispatcher.enqueue(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        dispatcher.enqueue(|| panic!("boom"));
        let h = hits.clone();
        dispatcher.enqueue(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.drain();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear_abandons_pending_tasks() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        dispatcher.enqueue(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        dispatcher.clear();
        dispatcher.drain();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
