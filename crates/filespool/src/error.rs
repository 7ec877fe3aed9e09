//! Error types for spool operations.

use thiserror::Error;

/// Boxed error produced by a [`Codec`](crate::Codec) or an upstream source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while spooling items through file-backed storage.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// A single framed item can never fit in a segment of the configured size.
    #[error("item of {frame} framed bytes exceeds segment capacity {capacity}")]
    ItemTooLarge {
        /// Total frame size (length prefix + payload) of the refused item.
        frame: usize,
        /// Capacity of one segment in bytes.
        capacity: usize,
    },

    /// File creation, mapping, or deletion failed.
    #[error("spool I/O failed")]
    Io(#[from] std::io::Error),

    /// The user-supplied codec failed to encode or decode an item.
    #[error("codec failed: {0}")]
    Codec(#[source] BoxError),

    /// An item was refused by a full queue and rollover is disabled.
    #[error("could not place item on queue: {item}")]
    QueueFull {
        /// Rendering of the refused item.
        item: String,
    },

    /// Operation on a queue that has already been closed.
    #[error("queue is closed")]
    Closed,

    /// An error raised by the upstream source, delivered through the spool.
    #[error(transparent)]
    Upstream(BoxError),
}

impl SpoolError {
    /// Returns `true` if this error terminates the queue for good.
    ///
    /// Every variant is terminal today; the method exists so callers do not
    /// bake that assumption in.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        true
    }
}
