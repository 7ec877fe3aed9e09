//! Property-based tests for the spool queues.
//!
//! The laws under test:
//! - FIFO: polling returns items in exactly the order they were offered,
//!   across any rollover pattern.
//! - Roundtrip: items come back bytewise-equal through any lawful codec.
//! - Bounded residency: a segment ring never holds more bytes than its
//!   capacity.

use filespool::{
    BincodeCodec, DirSegmentFiles, FrameQueue, Polled, RollingQueue, SpoolConfig,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::sync::Arc;

fn drain_all(mut poll: impl FnMut() -> Polled<Vec<u8>>, out: &mut Vec<Vec<u8>>) {
    loop {
        match poll() {
            Polled::Item(item) => out.push(item),
            Polled::Empty | Polled::Sealed => break,
        }
    }
}

proptest! {
    /// FIFO + roundtrip over a single segment, with capacity-driven
    /// interleaving: whenever the ring refuses an item we drain one and
    /// retry, so the test exercises wrap-around too.
    #[test]
    fn prop_single_segment_fifo(
        items in vec(vec(any::<u8>(), 0..48), 1..60),
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let q: FrameQueue<Vec<u8>, BincodeCodec> = FrameQueue::create(
            &dir.path().join("q.seg"),
            256,
            Arc::new(BincodeCodec),
        ).expect("create");

        let mut polled = Vec::with_capacity(items.len());
        for item in &items {
            while !q.offer(item).expect("offer") {
                match q.poll().expect("poll") {
                    Polled::Item(got) => polled.push(got),
                    Polled::Empty | Polled::Sealed => {
                        prop_assert!(false, "full queue reported empty");
                    }
                }
            }
        }
        drain_all(|| q.poll().expect("poll"), &mut polled);

        prop_assert_eq!(&polled, &items);
    }

    /// FIFO + roundtrip across rollovers, for arbitrary cap combinations.
    #[test]
    fn prop_rolling_fifo(
        items in vec(vec(any::<u8>(), 0..32), 1..80),
        rollover_every in 1u64..10,
        rollover_bytes in 24u64..200,
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = Arc::new(DirSegmentFiles::new(dir.path().join("segs")).expect("files"));
        let config = SpoolConfig::new(256)
            .with_rollover_every(rollover_every)
            .with_rollover_bytes(rollover_bytes);
        let q: RollingQueue<Vec<u8>, BincodeCodec> =
            RollingQueue::new(files, Arc::new(BincodeCodec), &config).expect("new");

        for item in &items {
            prop_assert!(q.offer(item).expect("offer"));
        }

        let mut polled = Vec::with_capacity(items.len());
        drain_all(|| q.poll().expect("poll"), &mut polled);

        prop_assert_eq!(&polled, &items);
        // Everything drained: only the tail segment is left alive.
        prop_assert_eq!(q.live_segments(), 1);
    }

    /// A segment ring never reports more resident bytes than its capacity,
    /// whatever the offer/poll interleaving.
    #[test]
    fn prop_bounded_residency(
        ops in vec(any::<bool>(), 1..200),
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let q: FrameQueue<u64, BincodeCodec> = FrameQueue::create(
            &dir.path().join("q.seg"),
            64,
            Arc::new(BincodeCodec),
        ).expect("create");

        let mut offered = 0u64;
        let mut polled = 0u64;
        for offer in ops {
            if offer {
                if q.offer(&offered).expect("offer") {
                    offered += 1;
                }
            } else if let Polled::Item(v) = q.poll().expect("poll") {
                prop_assert_eq!(v, polled);
                polled += 1;
            }
            prop_assert!(polled <= offered);
        }
    }
}
