//! The executor contract the drain machinery runs on: a single-threaded
//! worker accepting one `schedule(task)` primitive and nothing more.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// A unit of work for a [`Worker`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Serialized task execution: tasks run one at a time, in schedule order.
pub trait Worker: Send + Sync {
    /// Enqueues a task. Tasks scheduled after [`Self::shutdown`] are
    /// silently dropped.
    fn schedule(&self, task: Task);

    /// Stops accepting tasks and releases the execution resource once the
    /// already-queued tasks have run. Idempotent, and callable from a task
    /// running on this very worker.
    fn shutdown(&self);
}

/// Source of fresh workers, one per operator subscription.
pub trait Scheduler {
    /// Creates a worker dedicated to one subscription.
    fn create_worker(&self) -> Arc<dyn Worker>;
}

enum Command {
    Run(Task),
    Stop,
}

/// A [`Worker`] backed by one dedicated OS thread draining a task queue.
pub struct ThreadWorker {
    tx: Mutex<Option<Sender<Command>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl ThreadWorker {
    /// Spawns the worker thread.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Command>();
        let handle = thread::spawn(move || {
            while let Ok(command) = rx.recv() {
                match command {
                    Command::Run(task) => task(),
                    Command::Stop => break,
                }
            }
        });

        Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            stopped: AtomicBool::new(false),
        }
    }

    /// Returns `true` once [`Worker::shutdown`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Default for ThreadWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Worker for ThreadWorker {
    fn schedule(&self, task: Task) {
        if self.stopped.load(Ordering::Acquire) {
            log::trace!("dropping task scheduled after worker shutdown");
            return;
        }
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            // A send error means the thread is already gone; nothing to do.
            let _ = tx.send(Command::Run(task));
        }
    }

    fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.take() {
            let _ = tx.send(Command::Stop);
        }
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        self.shutdown();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // The last handle can be dropped from a task running on the
            // worker itself; joining there would deadlock.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// [`Scheduler`] producing one [`ThreadWorker`] per subscription.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn create_worker(&self) -> Arc<dyn Worker> {
        Arc::new(ThreadWorker::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn wait_until(cond: impl Fn() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(std::time::Instant::now() < deadline, "condition timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_tasks_run_in_schedule_order() {
        let worker = ThreadWorker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let seen = Arc::clone(&seen);
            worker.schedule(Box::new(move || {
                seen.lock().unwrap().push(i);
            }));
        }

        wait_until(|| seen.lock().unwrap().len() == 10);
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_shutdown_drops_later_tasks_but_runs_queued_ones() {
        let worker = ThreadWorker::new();
        let ran = Arc::new(AtomicUsize::new(0));

        {
            let ran = Arc::clone(&ran);
            worker.schedule(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }
        worker.shutdown();
        worker.shutdown();
        {
            let ran = Arc::clone(&ran);
            worker.schedule(Box::new(move || {
                ran.fetch_add(100, Ordering::SeqCst);
            }));
        }

        wait_until(|| worker.is_stopped());
        wait_until(|| ran.load(Ordering::SeqCst) == 1);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_from_the_worker_thread_itself() {
        let worker = Arc::new(ThreadWorker::new());
        let inner = Arc::clone(&worker);
        worker.schedule(Box::new(move || inner.shutdown()));
        wait_until(|| worker.is_stopped());
    }
}
