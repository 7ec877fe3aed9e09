//! The drain coordinator: couples the file-backed queue to the downstream
//! consumer's demand signal.

#[cfg(debug_assertions)]
use crate::invariants::debug_assert_single_drain;
use crate::invariants::{debug_assert_demand_covered, debug_assert_positive_demand};
use crate::subscriber::{DemandControl, Subscriber, Subscription};
use crate::worker::Worker;
use filespool::{OverflowQueue, Polled, SpoolError};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Demand value meaning "no accounting: emit whenever items exist".
pub const UNBOUNDED: u64 = u64::MAX;

// =============================================================================
// DRAIN PROTOCOL
// =============================================================================
//
// Three actors touch this state:
// - the upstream producer thread (on_next / on_error / on_completed),
// - the consumer thread (request / unsubscribe),
// - the drain worker (exactly one task at a time).
//
// `drain_requested` is the serialization gate. Whoever moves it 0→1
// schedules the drain task; any later increment just records that another
// pass is needed. The drain itself resets the counter to 1 at the top of
// each pass and only parks by winning a CAS from 1 back to 0, so a trigger
// that arrives mid-pass is never lost. Every terminal or cancelled exit
// leaves the counter ≥ 1, which suppresses all future scheduling for good.
//
// `error` is written before `done` (Release) and read after it (Acquire),
// so a drain that observes `done` also observes the error that caused it.
//
// =============================================================================

/// Operator state machine: pulls items off the queue onto the downstream
/// subscriber according to outstanding demand, on a single worker.
pub(crate) struct DrainCoordinator<T> {
    myself: Weak<Self>,
    queue: Arc<dyn OverflowQueue<T>>,
    worker: Arc<dyn Worker>,
    downstream: Mutex<Box<dyn Subscriber<T>>>,

    /// Outstanding demand credit; [`UNBOUNDED`] skips decrement.
    requested: AtomicU64,
    /// Pending drain passes; the 0→1 transition schedules the task.
    drain_requested: AtomicU64,
    /// Upstream has terminated (with `error` already in place if any).
    done: AtomicBool,
    /// Terminal error, written strictly before `done` is set.
    error: Mutex<Option<SpoolError>>,
    delay_error: bool,

    unsubscribed: AtomicBool,
    /// A terminal event has been delivered downstream.
    terminated: AtomicBool,

    #[cfg(debug_assertions)]
    draining: AtomicBool,
}

impl<T> DrainCoordinator<T>
where
    T: Send + fmt::Debug + 'static,
{
    pub(crate) fn new(
        queue: Arc<dyn OverflowQueue<T>>,
        worker: Arc<dyn Worker>,
        downstream: Box<dyn Subscriber<T>>,
        delay_error: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|myself| Self {
            myself: myself.clone(),
            queue,
            worker,
            downstream: Mutex::new(downstream),
            requested: AtomicU64::new(0),
            drain_requested: AtomicU64::new(0),
            done: AtomicBool::new(false),
            error: Mutex::new(None),
            delay_error,
            unsubscribed: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            #[cfg(debug_assertions)]
            draining: AtomicBool::new(false),
        })
    }

    /// Hands the subscription to the downstream subscriber. Called once by
    /// the operator wiring, before the upstream sees the sink.
    pub(crate) fn start(self: &Arc<Self>) {
        let subscription = Subscription::new(Arc::clone(self) as Arc<dyn DemandControl>);
        self.downstream().on_start(subscription);
    }

    // ---------------------------------------------------------------------
    // UPSTREAM INPUTS (producer thread)
    // ---------------------------------------------------------------------

    /// Offers an item onto the queue and kicks off a drain.
    ///
    /// Items arriving after a terminal signal or cancellation are dropped.
    pub(crate) fn on_next(&self, item: T) {
        if self.done.load(Ordering::Acquire)
            || self.terminated.load(Ordering::Acquire)
            || self.unsubscribed.load(Ordering::Acquire)
        {
            return;
        }

        match self.queue.offer(&item) {
            Ok(true) => self.trigger_drain(),
            Ok(false) => {
                log::warn!("queue refused item with rollover disabled");
                self.on_error(SpoolError::QueueFull {
                    item: format!("{item:?}"),
                });
            }
            Err(e) => self.on_error(e),
        }
    }

    /// Records the terminal error and kicks off a drain to deliver it.
    pub(crate) fn on_error(&self, error: SpoolError) {
        // Error first, then done: a drain that sees `done` must also see
        // the error.
        *self.error_slot() = Some(error);
        self.done.store(true, Ordering::Release);
        self.trigger_drain();
    }

    /// Marks the upstream complete and kicks off the final drain.
    pub(crate) fn on_completed(&self) {
        self.done.store(true, Ordering::Release);
        self.trigger_drain();
    }

    // ---------------------------------------------------------------------
    // DRAIN (worker thread)
    // ---------------------------------------------------------------------

    fn trigger_drain(&self) {
        if self.unsubscribed.load(Ordering::Acquire) {
            return;
        }
        if self.drain_requested.fetch_add(1, Ordering::AcqRel) == 0 {
            if let Some(me) = self.myself.upgrade() {
                self.worker.schedule(Box::new(move || me.drain()));
            }
        }
    }

    fn drain(&self) {
        #[cfg(debug_assertions)]
        let _guard = {
            let was = self.draining.swap(true, Ordering::SeqCst);
            debug_assert_single_drain!(was);
            DrainGuard(&self.draining)
        };

        loop {
            self.drain_requested.store(1, Ordering::Release);
            if self.unsubscribed.load(Ordering::Acquire) {
                return; // counter stays ≥ 1: nothing schedules again
            }

            let mut r = self.requested.load(Ordering::Acquire);
            let mut emitted: u64 = 0;

            while r > 0 {
                if self.unsubscribed.load(Ordering::Acquire) {
                    return;
                }
                match self.queue.poll() {
                    Ok(Polled::Item(item)) => {
                        self.downstream().on_next(item);
                        if r != UNBOUNDED {
                            r -= 1;
                        }
                        emitted += 1;
                    }
                    Ok(Polled::Empty | Polled::Sealed) => {
                        if self.finished() {
                            return;
                        }
                        break;
                    }
                    Err(e) => {
                        self.queue.close();
                        self.deliver_error(e);
                        return;
                    }
                }
            }

            if emitted != 0 {
                r = self.settle_emitted(emitted);
            }

            if self.unsubscribed.load(Ordering::Acquire) || (r == 0 && self.finished()) {
                return;
            }
        }
    }

    /// Subtracts emitted items from the demand counter, honoring the
    /// unbounded sentinel, and returns the remaining credit.
    fn settle_emitted(&self, emitted: u64) -> u64 {
        let mut current = self.requested.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return UNBOUNDED;
            }
            debug_assert_demand_covered!(current, emitted);
            match self.requested.compare_exchange_weak(
                current,
                current - emitted,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current - emitted,
                Err(actual) => current = actual,
            }
        }
    }

    /// Termination policy, consulted when the queue looks empty or demand
    /// has run out. Returns `true` when the drain should exit.
    ///
    /// Emptiness is re-checked after the `done` load: an offer sequenced
    /// before the terminal signal is visible by then, so it can never be
    /// dropped by a completion racing the last poll.
    fn finished(&self) -> bool {
        if !self.done.load(Ordering::Acquire) {
            return self.try_park();
        }

        if self.queue.is_empty() {
            // Everything delivered: close storage, then terminate.
            self.queue.close();
            self.deliver_stored_terminal();
            return true; // counter stays ≥ 1
        }

        if !self.delay_error {
            if let Some(error) = self.error_slot().take() {
                // Cut the stream short, dropping the buffered remainder.
                self.queue.close();
                self.deliver_error(error);
                return true;
            }
        }

        // Done but still draining the backlog (completion, or delayed
        // error): keep going as demand allows.
        self.try_park()
    }

    /// Parks the drain by winning the 1→0 race against new triggers.
    fn try_park(&self) -> bool {
        self.drain_requested
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn deliver_stored_terminal(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.error_slot().take() {
            Some(error) => {
                log::debug!("delivering terminal error: {error}");
                self.downstream().on_error(error);
            }
            None => {
                log::trace!("delivering completion");
                self.downstream().on_completed();
            }
        }
        self.worker.shutdown();
    }

    fn deliver_error(&self, error: SpoolError) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("delivering terminal error: {error}");
        self.downstream().on_error(error);
        self.worker.shutdown();
    }

    // ---------------------------------------------------------------------
    // HELPERS
    // ---------------------------------------------------------------------

    fn downstream(&self) -> MutexGuard<'_, Box<dyn Subscriber<T>>> {
        self.downstream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn error_slot(&self) -> MutexGuard<'_, Option<SpoolError>> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> DemandControl for DrainCoordinator<T>
where
    T: Send + fmt::Debug + 'static,
{
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        debug_assert_positive_demand!(n);

        let mut current = self.requested.load(Ordering::Relaxed);
        loop {
            if current == UNBOUNDED {
                break;
            }
            match self.requested.compare_exchange_weak(
                current,
                current.saturating_add(n),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.trigger_drain();
    }

    fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Release chain: coordinator stops first, then storage, then the
        // worker. Running the close on the worker serializes it behind any
        // in-flight drain.
        let queue = Arc::clone(&self.queue);
        self.worker.schedule(Box::new(move || queue.close()));
        self.worker.shutdown();
    }

    fn is_unsubscribed(&self) -> bool {
        self.unsubscribed.load(Ordering::Acquire)
    }
}

#[cfg(debug_assertions)]
struct DrainGuard<'a>(&'a AtomicBool);

#[cfg(debug_assertions)]
impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
