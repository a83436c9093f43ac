//! Process-wide concurrency limiting.

mod concurrency;

pub use concurrency::{ConcurrencyGate, GatePermit, DEFAULT_CONCURRENT_NUM};
