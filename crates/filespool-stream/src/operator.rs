//! Operator wiring: builds the queue, the drain coordinator, and the
//! upstream sink for one downstream subscription.

use crate::drain::{DrainCoordinator, UNBOUNDED};
use crate::subscriber::{Producer, Subscriber};
use crate::worker::Scheduler;
use filespool::{
    BoxError, Codec, FrameQueue, OverflowQueue, RollingQueue, SegmentFiles, SpoolConfig,
    SpoolError,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The identity-on-items operator: interposes a file-backed overflow queue
/// between a fast upstream and a demand-driven downstream.
///
/// One operator value holds the configuration and can be subscribed any
/// number of times; each subscription gets its own queue, drain
/// coordinator, and worker.
pub struct SpoolOperator<C, S> {
    config: SpoolConfig,
    codec: Arc<C>,
    files: Arc<dyn SegmentFiles>,
    scheduler: S,
}

impl<C, S: Scheduler> SpoolOperator<C, S> {
    /// Wires an operator from its collaborators. The configuration is
    /// validated at [`SpoolConfig`] construction.
    pub fn new(config: SpoolConfig, codec: C, files: Arc<dyn SegmentFiles>, scheduler: S) -> Self {
        Self {
            config,
            codec: Arc::new(codec),
            files,
            scheduler,
        }
    }

    /// Subscribes a downstream consumer and returns the sink the upstream
    /// source drives.
    ///
    /// Construction order follows the release order in reverse: the queue
    /// is built first (one segment, or a rolling queue when any cap is
    /// configured), then the worker, then the coordinator; the downstream
    /// receives its [`Subscription`](crate::Subscription) via `on_start`
    /// before this returns.
    ///
    /// `T: Debug` because a refused item is rendered into the overflow
    /// error message.
    pub fn subscribe<T, D>(&self, downstream: D) -> Result<SpoolSink<T>, SpoolError>
    where
        T: Send + fmt::Debug + 'static,
        C: Codec<T> + Send + Sync + 'static,
        D: Subscriber<T> + 'static,
    {
        let queue: Arc<dyn OverflowQueue<T>> = if self.config.rolls_over() {
            Arc::new(RollingQueue::new(
                Arc::clone(&self.files),
                Arc::clone(&self.codec),
                &self.config,
            )?)
        } else {
            Arc::new(FrameQueue::create(
                &self.files.next_path(),
                self.config.segment_bytes,
                Arc::clone(&self.codec),
            )?)
        };

        let worker = self.scheduler.create_worker();
        let coordinator =
            DrainCoordinator::new(queue, worker, Box::new(downstream), self.config.delay_error);
        coordinator.start();

        Ok(SpoolSink {
            coordinator,
            producer_wired: AtomicBool::new(false),
        })
    }
}

/// Upstream face of one subscription: the source feeds it like any
/// subscriber, and the spool absorbs whatever the downstream has not yet
/// asked for.
pub struct SpoolSink<T> {
    coordinator: Arc<DrainCoordinator<T>>,
    producer_wired: AtomicBool,
}

impl<T> SpoolSink<T>
where
    T: Send + fmt::Debug + 'static,
{
    /// One-shot producer slot. The first registered producer is
    /// immediately asked for unbounded demand: the disk buffer is the
    /// bound, not upstream credit.
    pub fn set_producer(&self, producer: &dyn Producer) {
        if self.producer_wired.swap(true, Ordering::AcqRel) {
            return;
        }
        producer.request(UNBOUNDED);
    }

    /// Offers the next upstream item.
    pub fn on_next(&self, item: T) {
        self.coordinator.on_next(item);
    }

    /// Signals an upstream failure, delivered downstream per the
    /// delay-error policy.
    pub fn on_error(&self, error: impl Into<BoxError>) {
        self.coordinator.on_error(SpoolError::Upstream(error.into()));
    }

    /// Signals upstream completion.
    pub fn on_completed(&self) {
        self.coordinator.on_completed();
    }
}

/// Drives a whole iterator through the sink, then completes it. The
/// common producer shape in tests and demos.
pub fn pump_iter<T, I>(sink: &SpoolSink<T>, items: I)
where
    T: Send + fmt::Debug + 'static,
    I: IntoIterator<Item = T>,
{
    for item in items {
        sink.on_next(item);
    }
    sink.on_completed();
}
