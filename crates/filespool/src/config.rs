//! Configuration for spool queues.

/// Smallest permitted segment capacity: one length prefix, one byte of
/// payload, and the held-back seal frame.
pub const MIN_SEGMENT_BYTES: usize = 16;

/// Configuration for a file-backed spool queue.
#[derive(Debug, Clone, Copy)]
pub struct SpoolConfig {
    /// Byte-ring capacity of each segment file.
    pub segment_bytes: usize,
    /// Roll to a new segment once this many bytes have been written to the
    /// current one. `None` disables size-based rollover.
    pub rollover_bytes: Option<u64>,
    /// Roll to a new segment once this many items have been written to the
    /// current one. `None` disables count-based rollover.
    pub rollover_every: Option<u64>,
    /// Deliver buffered items before an upstream error instead of cutting
    /// the stream short.
    pub delay_error: bool,
}

impl SpoolConfig {
    /// Creates a configuration with the given per-segment capacity and no
    /// rollover.
    ///
    /// # Panics
    ///
    /// Panics if `segment_bytes` is smaller than [`MIN_SEGMENT_BYTES`].
    pub fn new(segment_bytes: usize) -> Self {
        assert!(
            segment_bytes >= MIN_SEGMENT_BYTES,
            "segment_bytes must be at least {MIN_SEGMENT_BYTES}"
        );
        Self {
            segment_bytes,
            rollover_bytes: None,
            rollover_every: None,
            delay_error: false,
        }
    }

    /// Sets the size-based rollover cap.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is zero.
    pub fn with_rollover_bytes(mut self, bytes: u64) -> Self {
        assert!(bytes > 0, "rollover_bytes must be positive");
        self.rollover_bytes = Some(bytes);
        self
    }

    /// Sets the count-based rollover cap.
    ///
    /// # Panics
    ///
    /// Panics if `items` is zero.
    pub fn with_rollover_every(mut self, items: u64) -> Self {
        assert!(items > 0, "rollover_every must be positive");
        self.rollover_every = Some(items);
        self
    }

    /// Sets the delay-error policy.
    pub fn with_delay_error(mut self, delay: bool) -> Self {
        self.delay_error = delay;
        self
    }

    /// Returns `true` if any rollover cap is configured.
    #[inline]
    pub fn rolls_over(&self) -> bool {
        self.rollover_bytes.is_some() || self.rollover_every.is_some()
    }
}
