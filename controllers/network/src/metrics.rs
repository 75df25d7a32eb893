//! Probe and metrics endpoint.
//!
//! Serves `/healthz`, `/readyz` and `/metrics` (Prometheus text format) on
//! the probe address.

use crate::error::ControllerError;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TEXT_FORMAT, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Reconciliation counters and the readiness flag
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    errors: IntCounterVec,
    ready: AtomicBool,
}

impl Metrics {
    /// Build the registry with both counter families registered
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();
        let reconciliations = IntCounterVec::new(
            Opts::new("cloudops_reconciliations_total", "Reconciliations by kind and outcome"),
            &["kind", "outcome"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("cloudops_reconcile_errors_total", "Failed reconciliations by kind and error class"),
            &["kind", "class"],
        )?;
        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        Ok(Self {
            registry,
            reconciliations,
            errors,
            ready: AtomicBool::new(false),
        })
    }

    /// Count one finished reconciliation
    pub fn reconciled(&self, kind: &str, outcome: &str) {
        self.reconciliations.with_label_values(&[kind, outcome]).inc();
    }

    /// Count a failure under its error class
    pub fn failed(&self, kind: &str, error: &ControllerError) {
        self.errors.with_label_values(&[kind, error.class()]).inc();
    }

    /// Flip `/readyz` to 200 once the watchers are running
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Whether `/readyz` reports ready
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Prometheus text exposition of all counters
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ControllerError::Server(e.to_string()))
    }
}

/// Probe and metrics routes over `metrics`
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(render_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(metrics): State<Arc<Metrics>>) -> (StatusCode, &'static str) {
    if metrics.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn render_metrics(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Serve the probe router until the listener fails
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Server(format!("failed to bind {}: {}", addr, e)))?;
    info!("Serving probes and metrics on {}", addr);
    axum::serve(listener, router(metrics))
        .await
        .map_err(|e| ControllerError::Server(e.to_string()))
}
