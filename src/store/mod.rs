//! In-memory metric aggregation
//!
//! Counters and gauges fed by the tracking facade and drained by the scheduler.

mod counters;
mod snapshot;

pub use counters::{CounterStore, DEFAULT_MAX_OPERATION_KEYS};
pub use snapshot::*;
