//! Admission middleware for axum routers.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::uri::Authority;
use axum::http::{header, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::gate::ConcurrencyGate;
use crate::ratelimit::{
    HostAddrResolver, RateLimitHeaders, RateLimiterBackend, RequestMetadata, SignatureResolver,
};

/// Everything the throttle middleware needs per request.
#[derive(Clone)]
pub struct ThrottleState {
    limiter: Arc<dyn RateLimiterBackend>,
    resolver: Arc<dyn SignatureResolver>,
    clock: Arc<dyn Clock>,
}

impl ThrottleState {
    /// Use the default host + address signature and the system clock.
    pub fn new(limiter: Arc<dyn RateLimiterBackend>) -> Self {
        Self {
            limiter,
            resolver: Arc::new(HostAddrResolver),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SignatureResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Wrap `router` with the concurrency gate (outer) and the throttle (inner).
pub fn with_admission(router: Router, gate: ConcurrencyGate, throttle: ThrottleState) -> Router {
    router
        .layer(from_fn_with_state(throttle, throttle_middleware))
        .layer(from_fn_with_state(gate, concurrency_middleware))
}

/// Hold a gate slot for as long as the inner service runs.
pub async fn concurrency_middleware(
    State(gate): State<ConcurrencyGate>,
    request: Request,
    next: Next,
) -> Response {
    let permit = match gate.admit().await {
        Ok(permit) => permit,
        Err(e) => {
            warn!(error = %e, "Request arrived after the gate closed");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let response = next.run(request).await;
    gate.release(permit);
    response
}

/// Count the request against its caller and reject it with 429 when the
/// caller is over its limit. Limit headers are set on every response.
pub async fn throttle_middleware(
    State(state): State<ThrottleState>,
    request: Request,
    next: Next,
) -> Response {
    let metadata = request_metadata(&request);
    let key = state.resolver.resolve(&metadata);
    let now = state.clock.now();

    let decision = state.limiter.admit(&key, now).await;
    let headers = RateLimitHeaders::from_decision(state.limiter.limit(), &decision, now);
    trace!(key = %key, decision = ?decision, "Admission decided");

    let mut response = if decision.is_allowed() {
        next.run(request).await
    } else {
        debug!(
            key = %key,
            host = ?metadata.host,
            remote_ip = ?metadata.remote_ip,
            "Rejecting request over rate limit"
        );
        StatusCode::TOO_MANY_REQUESTS.into_response()
    };

    headers.write_to(response.headers_mut());
    response
}

/// Extract the caller-identifying fields from a request.
///
/// The host comes from the request target's authority, falling back to the
/// `Host` header; ports are dropped. The peer address is only known when the
/// server was started with connect info.
pub fn request_metadata<B>(request: &axum::http::Request<B>) -> RequestMetadata {
    let host = request
        .uri()
        .authority()
        .map(|authority| authority.host().to_string())
        .or_else(|| {
            request
                .headers()
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<Authority>().ok())
                .map(|authority| authority.host().to_string())
        });

    let remote_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    RequestMetadata { host, remote_ip }
}
