use crate::invariants::debug_assert_sealed_has_successor;
use crate::queue::{FrameQueue, OverflowQueue, Polled, FRAME_PREFIX};
use crate::{Codec, SegmentFiles, SpoolConfig, SpoolError};
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Multi-segment SPSC queue: a FIFO of [`FrameQueue`] segments with
/// size/count rollover and retire-on-drain.
///
/// The writer appends only to the tail segment; once a cap is reached it
/// seals the tail and starts a fresh one. The reader polls only from the
/// head; once it reads the seal frame it unlinks the drained segment and
/// moves on. Concatenated, the segments form one FIFO of items.
///
/// Per-item paths take no lock. The segment list is only locked at
/// rollover, retirement, and teardown, and the seal frame inside the head
/// segment is what actually hands the reader from one segment to the next:
/// the successor is pushed onto the list *before* the seal is written, so a
/// reader that observes the seal always finds it.
pub struct RollingQueue<T, C> {
    files: Arc<dyn SegmentFiles>,
    codec: Arc<C>,
    segment_bytes: usize,
    rollover_bytes: Option<u64>,
    rollover_every: Option<u64>,

    /// All live segments in FIFO order (front = reader, back = writer).
    segments: Mutex<VecDeque<Arc<FrameQueue<T, C>>>>,

    /// Writer-side state: cached tail and its item count.
    writer: UnsafeCell<WriterSide<T, C>>,
    /// Reader-side state: cached head.
    reader: UnsafeCell<ReaderSide<T, C>>,
    /// Producer-side encode buffer; encoding happens before the rollover
    /// decision, which needs the frame size.
    write_scratch: UnsafeCell<Vec<u8>>,

    closed: AtomicBool,
}

struct WriterSide<T, C> {
    tail: Arc<FrameQueue<T, C>>,
    /// Items offered to the tail so far; the byte total lives in the
    /// tail's own write position.
    items: u64,
    /// Creation ordinal of the tail.
    ordinal: u64,
}

struct ReaderSide<T, C> {
    head: Arc<FrameQueue<T, C>>,
}

// SAFETY: writer/write_scratch are only touched by the producer inside
// offer(), reader only by the consumer inside poll(); each cell has exactly
// one writing thread. The shared segment list is mutex-guarded and the
// segments themselves are SPSC-safe.
unsafe impl<T: Send, C: Send + Sync> Send for RollingQueue<T, C> {}
unsafe impl<T: Send, C: Send + Sync> Sync for RollingQueue<T, C> {}

impl<T, C: Codec<T>> RollingQueue<T, C> {
    /// Creates the queue and its first segment.
    pub fn new(
        files: Arc<dyn SegmentFiles>,
        codec: Arc<C>,
        config: &SpoolConfig,
    ) -> Result<Self, SpoolError> {
        let first = Arc::new(FrameQueue::create(
            &files.next_path(),
            config.segment_bytes,
            Arc::clone(&codec),
        )?);

        Ok(Self {
            files,
            codec,
            segment_bytes: config.segment_bytes,
            rollover_bytes: config.rollover_bytes,
            rollover_every: config.rollover_every,
            segments: Mutex::new(VecDeque::from([Arc::clone(&first)])),
            writer: UnsafeCell::new(WriterSide {
                tail: Arc::clone(&first),
                items: 0,
                ordinal: 0,
            }),
            reader: UnsafeCell::new(ReaderSide { head: first }),
            write_scratch: UnsafeCell::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Offers an item, rolling to a new segment when a cap is reached or
    /// the tail ring is backed up.
    ///
    /// Must only be called from the producer thread.
    pub fn offer(&self, item: &T) -> Result<bool, SpoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SpoolError::Closed);
        }

        // SAFETY: write_scratch and writer are producer-only cells, and
        // offer() is a producer-only entry point.
        let scratch = unsafe { &mut *self.write_scratch.get() };
        let w = unsafe { &mut *self.writer.get() };

        scratch.clear();
        self.codec
            .encode(item, scratch)
            .map_err(SpoolError::Codec)?;
        let frame = (FRAME_PREFIX + scratch.len()) as u64;

        let byte_breach = self
            .rollover_bytes
            .is_some_and(|cap| w.items > 0 && w.tail.bytes_written() + frame > cap);
        let item_breach = self.rollover_every.is_some_and(|cap| w.items + 1 > cap);

        let mut accepted = false;
        if !(byte_breach || item_breach) {
            accepted = w.tail.offer_payload(scratch)?;
        }
        if !accepted {
            // Cap reached, or the reader is lagging inside this same
            // segment and the ring has no room; either way, move on.
            self.roll(w)?;
            accepted = w.tail.offer_payload(scratch)?;
            // A fresh segment is empty, and oversize frames error out
            // before reaching the ring.
            debug_assert!(accepted, "fresh segment refused a fitting frame");
        }

        if accepted {
            w.items += 1;
        }
        Ok(accepted)
    }

    /// Seals the current tail and installs a fresh segment after it.
    fn roll(&self, w: &mut WriterSide<T, C>) -> Result<(), SpoolError> {
        let path = self.files.next_path();
        let next = Arc::new(FrameQueue::create(
            &path,
            self.segment_bytes,
            Arc::clone(&self.codec),
        )?);
        w.ordinal += 1;
        log::debug!(
            "rolling over to segment {} at {}",
            w.ordinal,
            path.display()
        );

        // The successor must be in the list before the seal becomes
        // readable, so the reader never dead-ends on a sealed head.
        self.segs().push_back(Arc::clone(&next));
        w.tail.seal();

        w.tail = next;
        w.items = 0;
        Ok(())
    }

    /// Polls the next item across segment boundaries, retiring drained
    /// segments as it goes.
    ///
    /// Must only be called from the consumer thread.
    pub fn poll(&self) -> Result<Polled<T>, SpoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SpoolError::Closed);
        }

        // SAFETY: reader is a consumer-only cell, and poll() is a
        // consumer-only entry point.
        let r = unsafe { &mut *self.reader.get() };

        loop {
            match r.head.poll()? {
                Polled::Item(item) => return Ok(Polled::Item(item)),
                Polled::Empty => return Ok(Polled::Empty),
                Polled::Sealed => {
                    // Drained and sealed: unlink it and advance.
                    r.head.close();
                    let next = {
                        let mut segs = self.segs();
                        if let Some(popped) = segs.pop_front() {
                            debug_assert!(
                                Arc::ptr_eq(&popped, &r.head),
                                "segment list head diverged from reader head"
                            );
                        }
                        segs.front().cloned()
                    };
                    debug_assert_sealed_has_successor!(next);
                    match next {
                        Some(head) => r.head = head,
                        // Unreachable by the push-before-seal rule; report
                        // a transient empty rather than wedge the reader.
                        None => return Ok(Polled::Empty),
                    }
                }
            }
        }
    }

    /// Returns `true` if no unread item remains in any live segment.
    ///
    /// A drained head whose seal frame has not been polled past yet still
    /// counts as empty; the seal is hand-off metadata, not an item.
    pub fn is_empty(&self) -> bool {
        self.segs().iter().all(|seg| seg.payload_drained())
    }

    /// Number of live (not yet retired) segments.
    pub fn live_segments(&self) -> usize {
        self.segs().len()
    }

    /// Closes every live segment and unlinks its file; idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut segs = self.segs();
        let n = segs.len();
        for seg in segs.drain(..) {
            seg.close();
        }
        log::debug!("closed rolling queue, released {n} segments");
    }

    fn segs(&self) -> MutexGuard<'_, VecDeque<Arc<FrameQueue<T, C>>>> {
        self.segments.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, C> OverflowQueue<T> for RollingQueue<T, C>
where
    T: Send,
    C: Codec<T>,
{
    fn offer(&self, item: &T) -> Result<bool, SpoolError> {
        RollingQueue::offer(self, item)
    }

    fn poll(&self) -> Result<Polled<T>, SpoolError> {
        RollingQueue::poll(self)
    }

    fn is_empty(&self) -> bool {
        RollingQueue::is_empty(self)
    }

    fn close(&self) {
        RollingQueue::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BincodeCodec, DirSegmentFiles};

    fn rolling(
        config: SpoolConfig,
    ) -> (tempfile::TempDir, RollingQueue<u64, BincodeCodec>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = Arc::new(DirSegmentFiles::new(dir.path().join("segs")).expect("files"));
        let q = RollingQueue::new(files, Arc::new(BincodeCodec), &config).expect("new");
        (dir, q)
    }

    fn seg_count(dir: &tempfile::TempDir) -> usize {
        std::fs::read_dir(dir.path().join("segs"))
            .expect("read_dir")
            .count()
    }

    #[test]
    fn test_count_rollover_preserves_fifo() {
        let (dir, q) = rolling(SpoolConfig::new(4096).with_rollover_every(3));

        for i in 0..10u64 {
            assert!(q.offer(&i).expect("offer"));
        }
        // 10 items at 3 per segment: segments 0..=3 exist, none retired yet.
        assert_eq!(q.live_segments(), 4);
        assert_eq!(seg_count(&dir), 4);

        for i in 0..10u64 {
            assert_eq!(q.poll().expect("poll"), Polled::Item(i));
        }
        assert_eq!(q.poll().expect("poll"), Polled::Empty);
        // Draining past each seal retires the segment and its file.
        assert_eq!(q.live_segments(), 1);
        assert_eq!(seg_count(&dir), 1);
    }

    #[test]
    fn test_size_rollover() {
        // u64 frames are 12 bytes; a 30-byte cap fits two frames.
        let (_dir, q) = rolling(SpoolConfig::new(4096).with_rollover_bytes(30));

        for i in 0..6u64 {
            assert!(q.offer(&i).expect("offer"));
        }
        assert_eq!(q.live_segments(), 3);

        for i in 0..6u64 {
            assert_eq!(q.poll().expect("poll"), Polled::Item(i));
        }
        assert_eq!(q.live_segments(), 1);
    }

    #[test]
    fn test_backlog_rolls_even_below_caps() {
        // Tiny segments, roomy cap: the third un-polled item does not fit
        // the 32-byte tail ring and must force a rollover.
        let (_dir, q) = rolling(SpoolConfig::new(32).with_rollover_every(100));

        assert!(q.offer(&1u64).expect("offer"));
        assert!(q.offer(&2u64).expect("offer"));
        assert!(q.offer(&3u64).expect("offer"));
        assert_eq!(q.live_segments(), 2);

        for i in 1..=3u64 {
            assert_eq!(q.poll().expect("poll"), Polled::Item(i));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_interleaved_offer_poll_across_rollovers() {
        let (_dir, q) = rolling(SpoolConfig::new(4096).with_rollover_every(2));

        let mut expected = 0u64;
        for i in 0..20u64 {
            assert!(q.offer(&i).expect("offer"));
            if i % 3 == 0 {
                assert_eq!(q.poll().expect("poll"), Polled::Item(expected));
                expected += 1;
            }
        }
        loop {
            match q.poll().expect("poll") {
                Polled::Item(v) => {
                    assert_eq!(v, expected);
                    expected += 1;
                }
                Polled::Empty => break,
                Polled::Sealed => unreachable!("rolling queue retires seals internally"),
            }
        }
        assert_eq!(expected, 20);
    }

    #[test]
    fn test_oversize_item_fails_fast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = Arc::new(DirSegmentFiles::new(dir.path().join("segs")).expect("files"));
        let config = SpoolConfig::new(64).with_rollover_every(4);
        let q: RollingQueue<Vec<u8>, BincodeCodec> =
            RollingQueue::new(files, Arc::new(BincodeCodec), &config).expect("new");

        assert!(matches!(
            q.offer(&vec![0u8; 256]),
            Err(SpoolError::ItemTooLarge { .. })
        ));
    }

    #[test]
    fn test_close_unlinks_every_live_segment() {
        let (dir, q) = rolling(SpoolConfig::new(4096).with_rollover_every(2));

        for i in 0..7u64 {
            assert!(q.offer(&i).expect("offer"));
        }
        assert_eq!(seg_count(&dir), 4);

        q.close();
        q.close();
        assert_eq!(seg_count(&dir), 0);
        assert!(matches!(q.offer(&1), Err(SpoolError::Closed)));
        assert!(matches!(q.poll(), Err(SpoolError::Closed)));
    }

    #[test]
    fn test_spsc_threads_rollover_fifo() {
        let (_dir, q) = rolling(SpoolConfig::new(256).with_rollover_every(5));
        let q = Arc::new(q);
        const N: u64 = 500;

        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                for i in 0..N {
                    while !q.offer(&i).expect("offer") {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut next = 0u64;
        while next < N {
            match q.poll().expect("poll") {
                Polled::Item(v) => {
                    assert_eq!(v, next);
                    next += 1;
                }
                Polled::Empty => std::thread::yield_now(),
                Polled::Sealed => unreachable!(),
            }
        }

        producer.join().expect("producer");
        assert_eq!(q.live_segments(), 1);
    }
}
