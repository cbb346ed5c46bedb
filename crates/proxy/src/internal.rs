use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::context::InternalProxyState;
use crate::forward::{self, AUTH_HEADER, PORT_HEADER};

/// Builds the internal proxy sidecar: it only ever has one upstream to pick from, the
/// contained app on `localhost`, so the whole thing is a single catch-all.
pub fn router(state: Arc<InternalProxyState>) -> Router {
    Router::new().fallback(handler).with_state(state)
}

async fn handler(
    State(state): State<Arc<InternalProxyState>>,
    ws: Option<WebSocketUpgrade>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Body,
) -> Response {
    let provided = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());
    if provided != Some(state.shared_secret.as_str()) {
        return (StatusCode::FORBIDDEN, "Invalid shared secret").into_response();
    }

    let Some(port) = headers
        .get(PORT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u16>().ok())
    else {
        return (StatusCode::BAD_REQUEST, "Missing X-Reproserver-Port header").into_response();
    };

    let original_host = headers.get(axum::http::header::HOST).cloned();
    let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
    let path_and_query = format!("{}{query}", uri.path());

    if let Some(ws) = ws {
        forward::forward_ws(
            ws,
            "127.0.0.1",
            port,
            &path_and_query,
            None,
            original_host,
            state.metrics.clone(),
        )
        .await
    } else {
        forward::forward_http(
            &state.http,
            "127.0.0.1",
            port,
            &path_and_query,
            method,
            headers,
            body,
            None,
            original_host,
            false,
            &state.metrics,
        )
        .await
    }
}
