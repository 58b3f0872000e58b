//! Wire types exchanged by the tributary engine.
//!
//! The `v1` module is generated from `proto/tributary/v1/tributary.proto`
//! with `prost-build` and checked in; do not edit it by hand.

#[allow(clippy::all, missing_debug_implementations, missing_docs, unreachable_pub)]
pub mod v1 {
    include!("tributary.v1.rs");
}

use tributary_primitives::{BlockRange, Clock};

impl From<BlockRange> for v1::BlockRange {
    fn from(range: BlockRange) -> Self {
        Self { start_block: range.start_block, end_block: range.exclusive_end_block }
    }
}

impl From<v1::BlockRange> for BlockRange {
    fn from(range: v1::BlockRange) -> Self {
        Self { start_block: range.start_block, exclusive_end_block: range.end_block }
    }
}

impl From<&Clock> for v1::Clock {
    fn from(clock: &Clock) -> Self {
        Self { number: clock.number, id: clock.id.clone(), timestamp: clock.timestamp }
    }
}

impl From<v1::Clock> for Clock {
    fn from(clock: v1::Clock) -> Self {
        Self { number: clock.number, id: clock.id, timestamp: clock.timestamp }
    }
}
