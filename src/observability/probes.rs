//! Probe and metrics endpoint.
//!
//! Kubernetes drives liveness and readiness against this server, and
//! Prometheus scrapes `/metrics`. Readiness is a shared handle: `main`
//! flips it on once the controller is constructed, and the shutdown path
//! flips it off so the endpoints stop advertising a worker that is
//! draining.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::TextEncoder;
use tokio::net::TcpListener;
use tracing::info;

use super::metrics::REGISTRY;

/// Cloneable readiness flag shared between the controller lifecycle and
/// the probe server
#[derive(Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip on once the controller is about to serve events
    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Flip off when shutdown begins
    pub fn mark_not_ready(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    fn is_ready(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Serve `/metrics`, `/healthz` and `/readyz` until the process exits
pub async fn serve(port: u16, readiness: Readiness) -> anyhow::Result<()> {
    let routes = Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route("/readyz", get(readyz))
        .with_state(readiness);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "probe server listening");
    axum::serve(listener, routes).await?;
    Ok(())
}

async fn metrics() -> impl IntoResponse {
    match TextEncoder::new().encode_to_string(&REGISTRY.gather()) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {e}"),
        ),
    }
}

async fn readyz(State(readiness): State<Readiness>) -> StatusCode {
    if readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
