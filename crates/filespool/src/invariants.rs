//! Debug assertion macros for byte-ring and queue invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds.

// =============================================================================
// INV-RING-01: Bounded Used Bytes
// =============================================================================

/// Assert that the bytes resident in the ring never exceed its capacity.
///
/// **Invariant**: `0 ≤ (write_pos - read_pos) ≤ capacity`
///
/// Used in: `ByteRing::try_write()` after computing the new write position
macro_rules! debug_assert_bounded_used {
    ($used:expr, $capacity:expr) => {
        debug_assert!(
            $used <= $capacity,
            "INV-RING-01 violated: {} used bytes exceed capacity {}",
            $used,
            $capacity
        )
    };
}

/// Assert that the read cursor does not advance past the write cursor.
///
/// **Invariant**: `read_pos ≤ write_pos` (after advance)
///
/// Used in: `ByteRing::advance_read()` before updating the cursor
macro_rules! debug_assert_read_not_past_write {
    ($new_read:expr, $write:expr) => {
        debug_assert!(
            $new_read <= $write,
            "INV-RING-01 violated: advancing read cursor {} beyond write cursor {}",
            $new_read,
            $write
        )
    };
}

// =============================================================================
// INV-RING-02: Monotonic Cursors
// =============================================================================

/// Assert that a cursor only increases.
///
/// **Invariant**: `new_value ≥ old_value`
///
/// Used in: `ByteRing::try_write()` for the write cursor,
/// `ByteRing::advance_read()` for the read cursor
macro_rules! debug_assert_monotonic_cursor {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "INV-RING-02 violated: {} cursor decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-FRAME-01: Whole-Frame Visibility
// =============================================================================

/// Assert that a frame's payload is fully readable once its prefix is.
///
/// The write cursor is published once per whole frame, so a prefix without
/// its payload indicates a framing bug, not a racing writer.
///
/// Used in: `FrameQueue::poll()` after reading a length prefix
macro_rules! debug_assert_whole_frame {
    ($avail:expr, $frame:expr) => {
        debug_assert!(
            $avail >= $frame,
            "INV-FRAME-01 violated: prefix visible but only {} of {} frame bytes readable",
            $avail,
            $frame
        )
    };
}

// =============================================================================
// INV-ROLL-01: Sealed Segment Has a Successor
// =============================================================================

/// Assert that a sealed head segment is followed by a live successor.
///
/// **Invariant**: the writer appends the successor to the segment list
/// before sealing the old tail, so a reader that observes the seal frame
/// always finds the next segment.
///
/// Used in: `RollingQueue::poll()` when retiring a drained head
macro_rules! debug_assert_sealed_has_successor {
    ($next:expr) => {
        debug_assert!(
            $next.is_some(),
            "INV-ROLL-01 violated: head sealed but no successor segment in the list"
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_bounded_used;
pub(crate) use debug_assert_monotonic_cursor;
pub(crate) use debug_assert_read_not_past_write;
pub(crate) use debug_assert_sealed_has_successor;
pub(crate) use debug_assert_whole_frame;
