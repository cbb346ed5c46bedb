use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::context::{ExternalProxyState, INTERNAL_PROXY_PORT};
use crate::destination::{self, Destination};
use crate::forward::{self, StampHeaders};

/// Builds the external reverse proxy: a single catch-all route, since the destination is
/// decoded from the path or the Host header rather than from a typed route template.
pub fn router(state: Arc<ExternalProxyState>) -> Router {
    Router::new().fallback(handler).with_state(state)
}

async fn handler(
    State(state): State<Arc<ExternalProxyState>>,
    ws: Option<WebSocketUpgrade>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Body,
) -> Response {
    let original_host = headers.get(axum::http::header::HOST).cloned();

    let (destination, forward_path, path_based) =
        match resolve(&state, &uri, original_host.as_ref()) {
            Some(resolved) => resolved,
            None => return (StatusCode::FORBIDDEN, "Invalid run link").into_response(),
        };

    let Some(upstream_host) = state.locator.host_for(destination.run_id) else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Run is not currently active").into_response();
    };

    let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
    let path_and_query = format!("{forward_path}{query}");
    let stamp = Some(StampHeaders {
        shared_secret: &state.shared_secret,
        requested_port: destination.port,
    });

    if let Some(ws) = ws {
        forward::forward_ws(
            ws,
            &upstream_host,
            INTERNAL_PROXY_PORT,
            &path_and_query,
            stamp,
            original_host,
            state.metrics.clone(),
        )
        .await
    } else {
        forward::forward_http(
            &state.http,
            &upstream_host,
            INTERNAL_PROXY_PORT,
            &path_and_query,
            method,
            headers,
            body,
            stamp,
            original_host,
            path_based,
            &state.metrics,
        )
        .await
    }
}

/// Tries the path form first, falling back to the host form, matching the original
/// proxy's preference order. The returned `bool` tells the caller whether the match was
/// path-based, since the location-rewrite mixin only applies to that form.
fn resolve(
    state: &ExternalProxyState,
    uri: &Uri,
    host: Option<&axum::http::HeaderValue>,
) -> Option<(Destination, String, bool)> {
    if let Some((destination, rest)) = destination::from_path(&state.codec, uri.path()) {
        let forward_path = if rest.is_empty() {
            "/".to_string()
        } else {
            format!("/{rest}")
        };
        return Some((destination, forward_path, true));
    }

    let host = host?.to_str().ok()?;
    let destination = destination::from_host(&state.codec, host)?;
    Some((destination, uri.path().to_string(), false))
}
