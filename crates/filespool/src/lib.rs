//! FileSpool - File-Backed SPSC Overflow Queue
//!
//! A single-producer single-consumer queue that spools items to disk so the
//! in-memory footprint stays bounded no matter how far the consumer lags.
//! Each segment is a fixed-capacity byte ring memory-mapped from one file;
//! items are length-prefixed frames published with a single release store,
//! and a rolling queue chains segments together with seal-frame hand-off.
//!
//! # Key Features
//!
//! - Lock-free offer/poll over a memory-mapped byte ring
//! - Cache-padded cursor pair with cached counterparts (minimal cross-core
//!   traffic)
//! - Rolling segment files with size/count caps and retire-on-drain
//! - Pluggable serialization via the [`Codec`] seam
//!
//! # Example
//!
//! ```no_run
//! use filespool::{BincodeCodec, DirSegmentFiles, Polled, RollingQueue, SpoolConfig};
//! use std::sync::Arc;
//!
//! let files = Arc::new(DirSegmentFiles::new("/tmp/spool")?);
//! let config = SpoolConfig::new(1 << 20).with_rollover_every(10_000);
//! let queue = RollingQueue::<u64, _>::new(files, Arc::new(BincodeCodec), &config)?;
//!
//! queue.offer(&42)?;
//! assert_eq!(queue.poll()?, Polled::Item(42));
//! # Ok::<(), filespool::SpoolError>(())
//! ```

mod codec;
mod config;
mod error;
mod files;
mod invariants;
mod queue;
mod ring;
mod rolling;

pub use codec::{BincodeCodec, Codec, FnCodec};
pub use config::{SpoolConfig, MIN_SEGMENT_BYTES};
pub use error::{BoxError, SpoolError};
pub use files::{DirSegmentFiles, SegmentFiles};
pub use queue::{FrameQueue, OverflowQueue, Polled, FRAME_PREFIX, SEAL};
pub use ring::ByteRing;
pub use rolling::RollingQueue;
