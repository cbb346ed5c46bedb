use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use tower::ServiceExt;

/// Header a Kubernetes liveness/readiness probe is expected to set. Anything else hitting
/// the `/health` path — notably a request routed by Host to a run's own `/health` path
/// inside its container — isn't a probe and falls through to the reverse proxy.
const PROBE_HEADER: &str = "x-kubernetes-probe";

/// Flipped once on shutdown signal; `/health` starts answering 503 from that point on.
/// Kept outside the access-log layer, per the health-endpoint design.
#[derive(Default)]
pub struct Draining(AtomicBool);

impl Draining {
    pub fn new() -> Self {
        Draining(AtomicBool::new(false))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct HealthState {
    draining: Arc<Draining>,
    proxy_fallback: Router,
}

/// `proxy_fallback` is the same reverse-proxy router mounted as the app's own fallback;
/// a `/health` request with no probe header is forwarded to it rather than answered here.
pub fn health_router(draining: Arc<Draining>, proxy_fallback: Router) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(HealthState {
            draining,
            proxy_fallback,
        })
}

async fn health(State(state): State<HealthState>, headers: HeaderMap, request: Request) -> Response {
    if !headers.contains_key(PROBE_HEADER) {
        return state
            .proxy_fallback
            .oneshot(request)
            .await
            .expect("router service is infallible");
    }

    if state.draining.get() {
        (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response()
    } else {
        (StatusCode::OK, "Ok").into_response()
    }
}

pub fn metrics_router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .with_state(registry)
}

async fn metrics(State(registry): State<Registry>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = registry.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        log::error!("failed to encode metrics: {err}");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (
        StatusCode::OK,
        String::from_utf8(buffer).unwrap_or_default(),
    )
}
