//! The reactive seam: how a downstream consumer and an upstream source see
//! the operator.

use filespool::SpoolError;
use std::sync::Arc;

/// Receiver of the operator's output: items in offer order, then exactly
/// one terminal event.
pub trait Subscriber<T>: Send {
    /// Called once, before any other callback, with the handle the
    /// consumer uses to signal demand and to unsubscribe.
    fn on_start(&mut self, subscription: Subscription) {
        let _ = subscription;
    }

    /// The next item. Never called beyond the outstanding demand.
    fn on_next(&mut self, item: T);

    /// Terminal failure. No further callbacks follow.
    fn on_error(&mut self, error: SpoolError);

    /// Terminal completion. No further callbacks follow.
    fn on_completed(&mut self);
}

/// Upstream demand signal, implemented by the source feeding the operator.
pub trait Producer: Send + Sync {
    /// Asks the source for `n` more items.
    fn request(&self, n: u64);
}

/// Internal face of the drain machinery that a [`Subscription`] drives.
pub(crate) trait DemandControl: Send + Sync {
    fn request(&self, n: u64);
    fn unsubscribe(&self);
    fn is_unsubscribed(&self) -> bool;
}

/// Consumer-side handle: demand credit and cancellation.
///
/// Clonable so the consumer can hand it to whichever thread decides how
/// fast to pull.
#[derive(Clone)]
pub struct Subscription {
    control: Arc<dyn DemandControl>,
}

impl Subscription {
    pub(crate) fn new(control: Arc<dyn DemandControl>) -> Self {
        Self { control }
    }

    /// Adds `n` to the outstanding demand (saturating) and kicks off a
    /// drain. `n == 0` is ignored; `u64::MAX` means unbounded.
    pub fn request(&self, n: u64) {
        self.control.request(n);
    }

    /// Cancels the subscription: no further items or terminal events are
    /// delivered, and the queue's files and the drain worker are released.
    /// Idempotent.
    pub fn unsubscribe(&self) {
        self.control.unsubscribe();
    }

    /// Returns `true` once [`Self::unsubscribe`] has been called.
    pub fn is_unsubscribed(&self) -> bool {
        self.control.is_unsubscribed()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("unsubscribed", &self.is_unsubscribed())
            .finish()
    }
}
