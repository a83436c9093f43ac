//! HTTP server implementation.

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{with_admission, ThrottleState};
use crate::config::GatekeeperConfig;
use crate::error::Result;
use crate::gate::ConcurrencyGate;
use crate::ratelimit::{RateLimiterBackend, Throttle, WindowStore};

/// HTTP server with the admission layer in front of its routes.
pub struct GatekeeperServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Process-wide concurrency gate
    gate: ConcurrencyGate,
    /// Per-caller throttle state
    throttle: ThrottleState,
}

impl GatekeeperServer {
    /// Create a server from its parts.
    pub fn new(
        addr: SocketAddr,
        gate: ConcurrencyGate,
        limiter: Arc<dyn RateLimiterBackend>,
    ) -> Self {
        Self {
            addr,
            gate,
            throttle: ThrottleState::new(limiter),
        }
    }

    /// Build the gate and throttle described by `config` over `store`.
    pub fn from_config(config: &GatekeeperConfig, store: Arc<dyn WindowStore>) -> Result<Self> {
        config.validate()?;
        let gate = ConcurrencyGate::new(config.concurrency.concurrent_num)?;
        let throttle = Throttle::new(config.throttle.to_throttle_config(), store);

        Ok(Self::new(config.server.listen_addr, gate, Arc::new(throttle)))
    }

    /// Replace the throttle state, e.g. to install a custom signature resolver.
    pub fn with_throttle_state(mut self, throttle: ThrottleState) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// The application routes. `/health` bypasses admission.
    pub fn router(&self) -> Router {
        let admitted = Router::new().route("/", get(root));

        with_admission(admitted, self.gate.clone(), self.throttle.clone())
            .route("/health", get(health))
    }

    /// Bind the configured address and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    ///
    /// Once the listener stops accepting, the gate is closed so no request
    /// still queued behind it runs after shutdown.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let gate = self.gate.clone();

        info!(
            addr = %local_addr,
            concurrent_num = gate.capacity(),
            "Starting HTTP server with graceful shutdown"
        );

        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            signal.await;
            gate.close();
        })
        .await;

        result.map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

async fn root() -> &'static str {
    "ok"
}

async fn health() -> StatusCode {
    StatusCode::OK
}
