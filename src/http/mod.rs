//! HTTP surface: admission middleware and the server that hosts it.

mod middleware;
mod server;

pub use middleware::{
    concurrency_middleware, request_metadata, throttle_middleware, with_admission, ThrottleState,
};
pub use server::GatekeeperServer;
