use crate::invariants::{
    debug_assert_bounded_used, debug_assert_monotonic_cursor, debug_assert_read_not_past_write,
};
use crate::SpoolError;
use crossbeam_utils::CachePadded;
use memmap2::MmapMut;
use std::cell::UnsafeCell;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// This byte ring is a classic SPSC producer-consumer protocol over a
// memory-mapped file, with the following synchronization guarantees:
//
// ## Byte Cursors (ABA Prevention)
//
// We use unbounded u64 byte cursors for `write_pos` and `read_pos` instead of
// wrapped offsets. This prevents the ABA problem entirely:
// - With 2^64 possible values, wrap-around is practically impossible
// - The physical offset is computed as `pos % capacity` only when touching
//   the mapped region
//
// ## Memory Ordering Protocol
//
// **Producer (write path):**
// 1. Load `write_pos` with Relaxed (only producer writes it)
// 2. Load `cached_read` with no ordering (UnsafeCell, single-writer)
// 3. If cache insufficient: Load `read_pos` with Acquire (synchronizes with
//    consumer's Release, so reclaimed space is really free)
// 4. Copy the frame bytes into the mapping (plain stores, protected by the
//    protocol)
// 5. Store `write_pos` with Release (publishes the frame to the consumer)
//
// **Consumer (read path):**
// 1. Load `read_pos` with Relaxed (only consumer writes it)
// 2. Load `cached_write` with no ordering (UnsafeCell, single-writer)
// 3. If cache insufficient: Load `write_pos` with Acquire (synchronizes with
//    producer's Release, so published bytes are really initialized)
// 4. Copy bytes out of the mapping (plain loads, protected by the protocol)
// 5. Store `read_pos` with Release (hands the space back to the producer)
//
// The write cursor is the *only* publication point: every frame becomes
// visible with one Release store, so a partially written frame is never
// observable from the consumer side.
//
// ## Single-Writer Invariants
//
// The following fields are accessed via UnsafeCell without atomics because
// they have exactly one writer:
// - `cached_read`: only written by the producer, read by the producer
// - `cached_write`: only written by the consumer, read by the consumer
// - mapped bytes in [read_pos, write_pos): written by the producer before
//   publication, read by the consumer after the Acquire load
//
// These invariants hold because the ring is strictly SPSC: one thread calls
// `try_write`, one thread calls `readable`/`read_at`/`advance_read`.
//
// =============================================================================

/// Fixed-capacity circular byte buffer stored in one memory-mapped file.
///
/// The building block of every spool segment: a single writer appends
/// variable-length byte runs, a single reader consumes them, and neither
/// side ever blocks the other. Optimized with:
/// - cache-padded cursor pair to prevent false sharing
/// - cached counterpart cursors to minimize cross-core traffic
/// - one atomic publication per logical frame
pub struct ByteRing {
    // === PRODUCER HOT ===
    /// Write cursor (written by producer, read by consumer).
    write_pos: CachePadded<AtomicU64>,
    /// Producer's cached view of the read cursor (avoids cross-core reads).
    cached_read: CachePadded<UnsafeCell<u64>>,

    // === CONSUMER HOT ===
    /// Read cursor (written by consumer, read by producer).
    read_pos: CachePadded<AtomicU64>,
    /// Consumer's cached view of the write cursor (avoids cross-core reads).
    cached_write: CachePadded<UnsafeCell<u64>>,

    // === COLD STATE ===
    /// Whether the backing file has been unlinked.
    removed: AtomicBool,

    /// The mapped region. Accessed through raw pointers from both sides;
    /// the cursor protocol keeps the accessed ranges disjoint.
    map: UnsafeCell<MmapMut>,
    capacity: u64,
    path: PathBuf,
}

// SAFETY: ByteRing is Send + Sync under the SPSC discipline documented in
// the module preamble. The cached cursors are single-writer cells, and all
// cross-thread hand-off of mapped bytes goes through the acquire/release
// cursor pair.
unsafe impl Send for ByteRing {}
unsafe impl Sync for ByteRing {}

impl ByteRing {
    /// Creates the backing file, sizes it to `capacity` bytes, and maps it.
    ///
    /// An existing file at `path` is truncated: segments are transient
    /// spill space, not durable state.
    pub fn create(path: &Path, capacity: usize) -> Result<Self, SpoolError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(capacity as u64)?;

        // SAFETY: the file was just created and sized by us; nothing else
        // maps or resizes it while this ring is alive.
        let map = unsafe { MmapMut::map_mut(&file)? };
        log::trace!("mapped segment file {} ({capacity} bytes)", path.display());

        Ok(Self {
            write_pos: CachePadded::new(AtomicU64::new(0)),
            cached_read: CachePadded::new(UnsafeCell::new(0)),
            read_pos: CachePadded::new(AtomicU64::new(0)),
            cached_write: CachePadded::new(UnsafeCell::new(0)),
            removed: AtomicBool::new(false),
            map: UnsafeCell::new(map),
            capacity: capacity as u64,
            path: path.to_owned(),
        })
    }

    /// Returns the ring capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Returns the backing file path.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current number of resident bytes.
    #[inline]
    pub fn used(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read) as usize
    }

    /// Returns `true` if the ring holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.write_pos.load(Ordering::Relaxed) == self.read_pos.load(Ordering::Relaxed)
    }

    /// Total bytes ever written to this ring.
    #[inline]
    pub fn write_position(&self) -> u64 {
        self.write_pos.load(Ordering::Relaxed)
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Write one logical frame given as a sequence of byte runs, publishing
    /// all of them with a single release store.
    ///
    /// Refuses (returns `false`) unless the ring has room for the whole
    /// frame *plus* `headroom` spare bytes. The framing layer holds back
    /// room for its seal frame this way.
    ///
    /// Fast path uses the cached read cursor to avoid cross-core reads;
    /// the slow path refreshes the cache only when needed.
    ///
    /// Must only be called from the producer thread.
    pub fn try_write(&self, parts: &[&[u8]], headroom: usize) -> bool {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        let wanted = total + headroom;
        let write = self.write_pos.load(Ordering::Relaxed);

        // Fast path: check the cached read cursor.
        // SAFETY: cached_read is only written by the producer (this code
        // path), so this unsynchronized read is safe.
        let cached = unsafe { *self.cached_read.get() };
        let mut free = (self.capacity - write.wrapping_sub(cached)) as usize;

        if free < wanted {
            // Slow path: refresh the cache.
            let read = self.read_pos.load(Ordering::Acquire);
            // SAFETY: cached_read is only written by the producer. The
            // Acquire load above synchronizes with the consumer's Release.
            unsafe { *self.cached_read.get() = read };

            free = (self.capacity - write.wrapping_sub(read)) as usize;
            if free < wanted {
                return false;
            }
        }

        let mut pos = write;
        for part in parts {
            self.copy_in(pos, part);
            pos = pos.wrapping_add(part.len() as u64);
        }

        let new_write = write.wrapping_add(total as u64);
        debug_assert_monotonic_cursor!("write", write, new_write);
        debug_assert_bounded_used!(
            new_write.wrapping_sub(self.read_pos.load(Ordering::Relaxed)),
            self.capacity
        );

        self.write_pos.store(new_write, Ordering::Release);
        true
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Returns the number of readable bytes, refreshing the cached write
    /// cursor whenever fewer than `wanted` bytes appear available.
    ///
    /// The refresh-on-shortfall rule matters for framing: a stale cache may
    /// cover a frame's prefix but not its payload, and only an Acquire
    /// reload can reveal the rest.
    ///
    /// Must only be called from the consumer thread.
    pub fn readable(&self, wanted: usize) -> usize {
        let read = self.read_pos.load(Ordering::Relaxed);

        // SAFETY: cached_write is only written by the consumer (this code
        // path), so this unsynchronized read is safe.
        let mut cached = unsafe { *self.cached_write.get() };
        let mut avail = cached.wrapping_sub(read) as usize;

        if avail < wanted {
            cached = self.write_pos.load(Ordering::Acquire);
            // SAFETY: cached_write is only written by the consumer. The
            // Acquire load above synchronizes with the producer's Release.
            unsafe { *self.cached_write.get() = cached };
            avail = cached.wrapping_sub(read) as usize;
        }

        avail
    }

    /// Copies `out.len()` bytes starting `offset` bytes past the read
    /// cursor, without consuming them.
    ///
    /// The caller must have established availability via [`Self::readable`].
    /// Must only be called from the consumer thread.
    pub fn read_at(&self, offset: u64, out: &mut [u8]) {
        let read = self.read_pos.load(Ordering::Relaxed);
        self.copy_out(read.wrapping_add(offset), out);
    }

    /// Consumes `n` bytes, handing their space back to the producer.
    ///
    /// Must only be called from the consumer thread.
    pub fn advance_read(&self, n: u64) {
        let read = self.read_pos.load(Ordering::Relaxed);
        let new_read = read.wrapping_add(n);

        debug_assert_monotonic_cursor!("read", read, new_read);
        debug_assert_read_not_past_write!(new_read, self.write_pos.load(Ordering::Relaxed));

        self.read_pos.store(new_read, Ordering::Release);
    }

    // ---------------------------------------------------------------------
    // LIFECYCLE
    // ---------------------------------------------------------------------

    /// Unlinks the backing file; idempotent, `NotFound` is ignored.
    ///
    /// The mapping stays valid until the ring is dropped, so a producer
    /// caught mid-write on a raced teardown lands in still-mapped pages of
    /// the deleted file rather than faulting.
    pub fn remove(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("removing segment file {}", self.path.display());
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                log::warn!("failed to remove segment file {}: {e}", self.path.display());
            }
        }
    }

    // ---------------------------------------------------------------------
    // INTERNAL: wrap-aware byte copies
    // ---------------------------------------------------------------------

    /// Copy `src` into the mapping at logical position `pos`, splitting the
    /// copy at the physical end of the region.
    fn copy_in(&self, pos: u64, src: &[u8]) {
        if src.is_empty() {
            return;
        }
        let off = (pos % self.capacity) as usize;
        let first = src.len().min(self.capacity as usize - off);

        // SAFETY: the producer owns [write_pos, write_pos + free) until the
        // Release store in try_write; the consumer never reads past the
        // published write cursor, so these ranges are not concurrently read.
        unsafe {
            let base = (*self.map.get()).as_mut_ptr();
            ptr::copy_nonoverlapping(src.as_ptr(), base.add(off), first);
            if first < src.len() {
                ptr::copy_nonoverlapping(src.as_ptr().add(first), base, src.len() - first);
            }
        }
    }

    /// Copy bytes out of the mapping at logical position `pos`, splitting
    /// the copy at the physical end of the region.
    fn copy_out(&self, pos: u64, out: &mut [u8]) {
        if out.is_empty() {
            return;
        }
        let off = (pos % self.capacity) as usize;
        let first = out.len().min(self.capacity as usize - off);

        // SAFETY: the consumer owns [read_pos, write_pos); the bytes were
        // published by the producer's Release store and acquired by the
        // readable() load, and the producer never overwrites them until
        // read_pos advances past them.
        unsafe {
            let base = (*self.map.get()).as_ptr();
            ptr::copy_nonoverlapping(base.add(off), out.as_mut_ptr(), first);
            if first < out.len() {
                ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(first), out.len() - first);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(capacity: usize) -> (tempfile::TempDir, ByteRing) {
        let dir = tempfile::tempdir().expect("tempdir");
        let ring = ByteRing::create(&dir.path().join("ring.seg"), capacity).expect("create");
        (dir, ring)
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let (_dir, ring) = ring(64);

        assert!(ring.try_write(&[b"hello", b" ", b"world"], 0));
        assert_eq!(ring.used(), 11);

        assert_eq!(ring.readable(11), 11);
        let mut out = [0u8; 11];
        ring.read_at(0, &mut out);
        assert_eq!(&out, b"hello world");
        ring.advance_read(11);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_refuses_when_full() {
        let (_dir, ring) = ring(16);

        assert!(ring.try_write(&[&[7u8; 12]], 0));
        assert!(!ring.try_write(&[&[8u8; 5]], 0));

        // Draining makes room again.
        ring.advance_read(12);
        assert!(ring.try_write(&[&[8u8; 5]], 0));
    }

    #[test]
    fn test_headroom_is_held_back() {
        let (_dir, ring) = ring(16);

        // 12 payload bytes + 4 headroom exactly fill the ring...
        assert!(ring.try_write(&[&[1u8; 12]], 4));
        // ...so nothing more fits with the same headroom,
        assert!(!ring.try_write(&[&[2u8; 1]], 4));
        // but the held-back bytes themselves are still writable.
        assert!(ring.try_write(&[&[3u8; 4]], 0));
    }

    #[test]
    fn test_wrap_around_preserves_bytes() {
        let (_dir, ring) = ring(16);

        assert!(ring.try_write(&[&[0u8; 10]], 0));
        ring.advance_read(10);

        // This frame wraps the physical end of the region.
        let payload: Vec<u8> = (0u8..12).collect();
        assert!(ring.try_write(&[&payload], 0));

        let mut out = [0u8; 12];
        assert_eq!(ring.readable(12), 12);
        ring.read_at(0, &mut out);
        assert_eq!(&out[..], &payload[..]);
        ring.advance_read(12);
    }

    #[test]
    fn test_read_at_offset_peeks_without_consuming() {
        let (_dir, ring) = ring(64);

        assert!(ring.try_write(&[b"abcd", b"efgh"], 0));
        let mut out = [0u8; 4];
        ring.read_at(4, &mut out);
        assert_eq!(&out, b"efgh");
        assert_eq!(ring.used(), 8);
    }

    #[test]
    fn test_remove_is_idempotent_and_unlinks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ring.seg");
        let ring = ByteRing::create(&path, 32).expect("create");

        assert!(path.exists());
        ring.remove();
        assert!(!path.exists());
        ring.remove();
    }

    #[test]
    fn test_spsc_threads_preserve_byte_order() {
        use std::sync::Arc;

        let dir = tempfile::tempdir().expect("tempdir");
        let ring = Arc::new(ByteRing::create(&dir.path().join("ring.seg"), 128).expect("create"));

        let writer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                for i in 0u8..100 {
                    while !ring.try_write(&[&[i]], 0) {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut seen = Vec::with_capacity(100);
        while seen.len() < 100 {
            if ring.readable(1) >= 1 {
                let mut b = [0u8; 1];
                ring.read_at(0, &mut b);
                ring.advance_read(1);
                seen.push(b[0]);
            } else {
                std::thread::yield_now();
            }
        }

        writer.join().expect("writer");
        let expected: Vec<u8> = (0u8..100).collect();
        assert_eq!(seen, expected);
    }
}
