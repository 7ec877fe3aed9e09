use crate::invariants::debug_assert_whole_frame;
use crate::ring::ByteRing;
use crate::{Codec, SpoolError};
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Size of the little-endian length prefix in front of every payload.
pub const FRAME_PREFIX: usize = 4;

/// Reserved length value marking the end of a sealed segment.
///
/// Payload lengths are bounded by the segment capacity, far below this, so
/// the sentinel can never collide with a real frame.
pub const SEAL: u32 = u32::MAX;

/// Outcome of polling a spool queue.
#[derive(Debug, PartialEq, Eq)]
pub enum Polled<T> {
    /// The next item, in offer order.
    Item(T),
    /// Nothing readable right now; retry after the writer makes progress.
    Empty,
    /// The segment is sealed: no item will ever appear here again.
    Sealed,
}

/// The common face of the single-segment and rolling queues, as consumed
/// by the drain machinery.
pub trait OverflowQueue<T>: Send + Sync {
    /// Offers an item; `Ok(false)` means the queue is out of space.
    fn offer(&self, item: &T) -> Result<bool, SpoolError>;

    /// Polls the next item. Must only be called from the consumer thread.
    fn poll(&self) -> Result<Polled<T>, SpoolError>;

    /// Returns `true` if no offered item is awaiting a poll.
    fn is_empty(&self) -> bool;

    /// Closes the queue and unlinks its backing storage; idempotent.
    fn close(&self);
}

/// Typed SPSC queue over one [`ByteRing`]: length-prefixed frames plus a
/// user-supplied codec.
///
/// One `FrameQueue` is one *segment*. A producer `offer`s items, a consumer
/// `poll`s them back in the same order; `seal` ends the segment so a rolling
/// queue's reader knows to move on.
pub struct FrameQueue<T, C> {
    ring: ByteRing,
    codec: Arc<C>,
    /// Producer-side encode buffer, reused across offers.
    write_scratch: UnsafeCell<Vec<u8>>,
    /// Consumer-side payload buffer, reused across polls.
    read_scratch: UnsafeCell<Vec<u8>>,
    /// Producer has written the seal frame.
    sealed: AtomicBool,
    /// Consumer has read the seal frame; the queue is terminal.
    end_observed: AtomicBool,
    closed: AtomicBool,
    _marker: PhantomData<fn() -> T>,
}

// SAFETY: the scratch cells are single-writer: write_scratch is touched
// only by the producer inside offer(), read_scratch only by the consumer
// inside poll(). Everything else is atomics or the SPSC-safe ByteRing.
unsafe impl<T: Send, C: Send + Sync> Send for FrameQueue<T, C> {}
unsafe impl<T: Send, C: Send + Sync> Sync for FrameQueue<T, C> {}

impl<T, C: Codec<T>> FrameQueue<T, C> {
    /// Creates a segment backed by a fresh file at `path`.
    pub fn create(path: &Path, capacity: usize, codec: Arc<C>) -> Result<Self, SpoolError> {
        let ring = ByteRing::create(path, capacity)?;
        Ok(Self {
            ring,
            codec,
            write_scratch: UnsafeCell::new(Vec::new()),
            read_scratch: UnsafeCell::new(Vec::new()),
            sealed: AtomicBool::new(false),
            end_observed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            _marker: PhantomData,
        })
    }

    /// Encodes `item` and offers the frame.
    ///
    /// Returns `Ok(false)` when the ring cannot hold the frame right now.
    /// An item whose frame could never fit even an empty segment is an
    /// [`SpoolError::ItemTooLarge`] instead, so callers can tell "wait for
    /// the reader" apart from "give up".
    ///
    /// Must only be called from the producer thread.
    pub fn offer(&self, item: &T) -> Result<bool, SpoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SpoolError::Closed);
        }

        // SAFETY: write_scratch is only touched here, and offer() is a
        // producer-only entry point.
        let scratch = unsafe { &mut *self.write_scratch.get() };
        scratch.clear();
        self.codec
            .encode(item, scratch)
            .map_err(SpoolError::Codec)?;

        self.offer_encoded(scratch)
    }

    /// Offers an already-encoded payload. Shared with the rolling queue,
    /// which encodes once up front to make its rollover decision.
    pub(crate) fn offer_payload(&self, payload: &[u8]) -> Result<bool, SpoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SpoolError::Closed);
        }
        self.offer_encoded(payload)
    }

    fn offer_encoded(&self, payload: &[u8]) -> Result<bool, SpoolError> {
        let frame = FRAME_PREFIX + payload.len();
        // Hold FRAME_PREFIX bytes back so a seal frame always fits.
        if frame + FRAME_PREFIX > self.ring.capacity() {
            return Err(SpoolError::ItemTooLarge {
                frame,
                capacity: self.ring.capacity(),
            });
        }

        let prefix = (payload.len() as u32).to_le_bytes();
        Ok(self.ring.try_write(&[&prefix, payload], FRAME_PREFIX))
    }

    /// Polls the next item, [`Polled::Empty`], or [`Polled::Sealed`].
    ///
    /// Must only be called from the consumer thread.
    pub fn poll(&self) -> Result<Polled<T>, SpoolError> {
        if self.end_observed.load(Ordering::Relaxed) {
            return Ok(Polled::Sealed);
        }

        if self.ring.readable(FRAME_PREFIX) < FRAME_PREFIX {
            return Ok(Polled::Empty);
        }

        let mut prefix = [0u8; FRAME_PREFIX];
        self.ring.read_at(0, &mut prefix);
        let len = u32::from_le_bytes(prefix);

        if len == SEAL {
            self.ring.advance_read(FRAME_PREFIX as u64);
            self.end_observed.store(true, Ordering::Relaxed);
            return Ok(Polled::Sealed);
        }

        let frame = FRAME_PREFIX + len as usize;
        let avail = self.ring.readable(frame);
        if avail < frame {
            // The write cursor publishes whole frames, so a visible prefix
            // implies a visible payload.
            debug_assert_whole_frame!(avail, frame);
            return Ok(Polled::Empty);
        }

        // SAFETY: read_scratch is only touched here, and poll() is a
        // consumer-only entry point.
        let scratch = unsafe { &mut *self.read_scratch.get() };
        scratch.resize(len as usize, 0);
        self.ring.read_at(FRAME_PREFIX as u64, scratch);
        self.ring.advance_read(frame as u64);

        self.codec
            .decode(scratch)
            .map(Polled::Item)
            .map_err(SpoolError::Codec)
    }

    /// Writes the seal frame, ending the segment; idempotent.
    ///
    /// Must only be called from the producer thread.
    pub fn seal(&self) {
        if self.sealed.load(Ordering::Relaxed) {
            return;
        }
        let wrote = self.ring.try_write(&[&SEAL.to_le_bytes()], 0);
        // The hold-back in offer_encoded guarantees room for the seal.
        debug_assert!(wrote, "seal frame did not fit despite held-back bytes");
        // Frame first, flag second: a reader that observes `sealed` can
        // rely on the seal bytes being part of the unread count.
        self.sealed.store(true, Ordering::Release);
        log::trace!("sealed segment {}", self.ring.path().display());
    }

    /// Returns `true` if every offered byte has been polled.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Returns `true` when no unread payload remains: the ring is empty,
    /// or the only unread bytes are the trailing seal frame.
    pub(crate) fn payload_drained(&self) -> bool {
        // Flag before count: once `sealed` is visible, the seal frame is
        // included in `used`, so `used == 4` can only be the seal itself.
        let sealed = self.sealed.load(Ordering::Acquire);
        let used = self.ring.used();
        used == 0 || (sealed && used == FRAME_PREFIX)
    }

    /// Total bytes written to this segment so far (prefixes included).
    pub fn bytes_written(&self) -> u64 {
        self.ring.write_position()
    }

    /// Backing file path of this segment.
    pub fn path(&self) -> &Path {
        self.ring.path()
    }

    /// Marks the queue closed and unlinks the backing file; idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ring.remove();
    }
}

impl<T, C> OverflowQueue<T> for FrameQueue<T, C>
where
    T: Send,
    C: Codec<T>,
{
    fn offer(&self, item: &T) -> Result<bool, SpoolError> {
        FrameQueue::offer(self, item)
    }

    fn poll(&self) -> Result<Polled<T>, SpoolError> {
        FrameQueue::poll(self)
    }

    fn is_empty(&self) -> bool {
        FrameQueue::is_empty(self)
    }

    fn close(&self) {
        FrameQueue::close(self);
    }
}
