//! Gatekeeper - Request Admission for HTTP Servers
//!
//! This crate decides, per incoming request, whether it proceeds at once,
//! waits for a free execution slot, or is rejected because its caller has
//! exceeded a per-window attempt budget. A process-wide concurrency gate runs
//! first; a per-caller throttle backed by an expiring key/value store runs
//! second.

pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod http;
pub mod ratelimit;
