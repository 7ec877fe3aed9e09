//! Pull-Based Stream Operator over FileSpool
//!
//! An identity transform on a demand-driven stream of typed items that
//! interposes a file-backed overflow queue between a fast producer and a
//! slower consumer. The producer is never blocked and never throttled
//! (upstream demand is unbounded) because the spool absorbs the gap on
//! disk; the consumer receives exactly the items it asked for, in exactly
//! the order they were produced.
//!
//! # Pieces
//!
//! - [`Subscriber`] / [`Producer`]: the reactive seam the operator plugs
//!   into
//! - [`SpoolOperator`] / [`SpoolSink`]: per-subscription wiring
//! - [`Worker`] / [`Scheduler`]: the single-threaded executor contract the
//!   drain runs on, with [`ThreadScheduler`] as the provided
//!   implementation
//!
//! # Example
//!
//! ```no_run
//! use filespool::{BincodeCodec, DirSegmentFiles, SpoolConfig, SpoolError};
//! use filespool_stream::{pump_iter, Subscriber, Subscription, SpoolOperator, ThreadScheduler};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl Subscriber<u64> for Printer {
//!     fn on_start(&mut self, subscription: Subscription) {
//!         subscription.request(u64::MAX);
//!     }
//!     fn on_next(&mut self, item: u64) {
//!         println!("got {item}");
//!     }
//!     fn on_error(&mut self, error: SpoolError) {
//!         eprintln!("failed: {error}");
//!     }
//!     fn on_completed(&mut self) {
//!         println!("done");
//!     }
//! }
//!
//! let files = Arc::new(DirSegmentFiles::new("/tmp/spool")?);
//! let config = SpoolConfig::new(1 << 20).with_rollover_every(10_000);
//! let operator = SpoolOperator::new(config, BincodeCodec, files, ThreadScheduler);
//!
//! let sink = operator.subscribe(Printer)?;
//! pump_iter(&sink, 0..100u64);
//! # Ok::<(), SpoolError>(())
//! ```

mod drain;
mod invariants;
mod operator;
mod subscriber;
mod worker;

pub use drain::UNBOUNDED;
pub use operator::{pump_iter, SpoolOperator, SpoolSink};
pub use subscriber::{Producer, Subscriber, Subscription};
pub use worker::{Scheduler, Task, ThreadScheduler, ThreadWorker, Worker};

// Re-export the core types an operator caller needs.
pub use filespool::{
    BincodeCodec, Codec, DirSegmentFiles, FnCodec, SegmentFiles, SpoolConfig, SpoolError,
};
