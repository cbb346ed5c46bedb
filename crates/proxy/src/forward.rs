use axum::body::Body;
use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::http::Request as WsRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::metrics::ProxyMetrics;

pub const AUTH_HEADER: &str = "x-reproserver-authenticate";
pub const PORT_HEADER: &str = "x-reproserver-port";

const HOP_BY_HOP: &[&str] = &["content-length", "connection", "transfer-encoding"];

const REDIRECT_STATUS_HEADER: &str = "x-redirect-status";
const REDIRECT_STATUS_TEXT_HEADER: &str = "x-redirect-statustext";
const ORIG_LOCATION_HEADER: &str = "x-orig-location";

/// Headers the external proxy stamps on its hop to the internal proxy, so the internal
/// proxy can check the shared secret and learn which container port was requested. The
/// internal proxy's own hop to the contained app passes `None`: the app should see a
/// plain request with nothing reproserver-specific added.
pub struct StampHeaders<'a> {
    pub shared_secret: &'a str,
    pub requested_port: u16,
}

/// Forwards a regular HTTP request to `http://{upstream_host}:{upstream_port}{path}`,
/// streaming the response body back. `rewrite_redirects` applies the path-based external
/// proxy's "location rewrite" mixin: a same-origin service worker can't follow a redirect
/// that points outside the proxy path, so a 300-399 upstream response is turned into a
/// 200 carrying the original status/location in `x-redirect-*`/`x-orig-location` headers
/// for the service worker to re-issue through the proxy itself.
pub async fn forward_http(
    client: &reqwest::Client,
    upstream_host: &str,
    upstream_port: u16,
    path_and_query: &str,
    method: Method,
    mut headers: HeaderMap,
    body: Body,
    stamp: Option<StampHeaders<'_>>,
    original_host: Option<HeaderValue>,
    rewrite_redirects: bool,
    metrics: &ProxyMetrics,
) -> Response {
    let url = format!("http://{upstream_host}:{upstream_port}{path_and_query}");

    headers.remove(axum::http::header::HOST);
    if let Some(stamp) = stamp {
        headers.insert(
            AUTH_HEADER,
            HeaderValue::from_str(stamp.shared_secret).unwrap(),
        );
        headers.insert(
            PORT_HEADER,
            HeaderValue::from_str(&stamp.requested_port.to_string()).unwrap(),
        );
    }
    if let Some(host) = original_host {
        headers.insert(axum::http::header::HOST, host);
    }

    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            metrics.record("http", "error");
            return (StatusCode::BAD_GATEWAY, format!("Bad request body: {err}"))
                .into_response();
        }
    };

    let upstream_request = client
        .request(method, &url)
        .headers(headers)
        .body(body_bytes);

    match upstream_request.send().await {
        Ok(upstream_response) => {
            metrics.record("http", "success");
            let status = upstream_response.status();
            let mut response_headers = HeaderMap::new();
            for (name, value) in upstream_response.headers() {
                if HOP_BY_HOP.contains(&name.as_str()) {
                    continue;
                }
                response_headers.insert(name.clone(), value.clone());
            }

            let is_redirect = rewrite_redirects && status.is_redirection();
            let final_status = if is_redirect { StatusCode::OK } else { status };
            if is_redirect {
                if let Some(location) = response_headers.remove(axum::http::header::LOCATION) {
                    response_headers.insert(HeaderName::from_static(ORIG_LOCATION_HEADER), location);
                }
                response_headers.insert(
                    HeaderName::from_static(REDIRECT_STATUS_HEADER),
                    HeaderValue::from_str(&status.as_u16().to_string()).unwrap(),
                );
                if let Some(reason) = status.canonical_reason().and_then(|r| HeaderValue::from_str(r).ok()) {
                    response_headers.insert(HeaderName::from_static(REDIRECT_STATUS_TEXT_HEADER), reason);
                }
            }

            let stream = upstream_response.bytes_stream();
            let mut response = Response::new(Body::from_stream(stream));
            *response.status_mut() = final_status;
            *response.headers_mut() = response_headers;
            response
        }
        Err(err) => {
            metrics.record("http", "error");
            log::warn!("upstream connection failed: {err}");
            (StatusCode::SERVICE_UNAVAILABLE, "Bad gateway").into_response()
        }
    }
}

/// Attempts to open the upstream WebSocket before upgrading the downstream connection,
/// so a connect failure can be reported with the upstream's own HTTP error status.
/// On success, relays frames in both directions until either side closes.
pub async fn forward_ws(
    ws: WebSocketUpgrade,
    upstream_host: &str,
    upstream_port: u16,
    path_and_query: &str,
    stamp: Option<StampHeaders<'_>>,
    original_host: Option<HeaderValue>,
    metrics: ProxyMetrics,
) -> Response {
    let url = format!("ws://{upstream_host}:{upstream_port}{path_and_query}");

    let mut builder = WsRequest::builder().uri(&url);
    if let Some(stamp) = stamp {
        builder = builder
            .header(AUTH_HEADER, stamp.shared_secret)
            .header(PORT_HEADER, stamp.requested_port.to_string());
    }
    if let Some(host) = original_host.as_ref().and_then(|h| h.to_str().ok()) {
        builder = builder.header("host", host);
    }
    let request = match builder.body(()) {
        Ok(request) => request,
        Err(err) => {
            metrics.record("ws", "error");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    let upstream = match tokio_tungstenite::connect_async(request).await {
        Ok((stream, _response)) => stream,
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            metrics.record("ws", "error");
            let status = StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            return (status, "Upstream rejected WebSocket upgrade").into_response();
        }
        Err(err) => {
            metrics.record("ws", "error");
            log::warn!("upstream websocket connect failed: {err}");
            return (StatusCode::SERVICE_UNAVAILABLE, "Bad gateway").into_response();
        }
    };

    metrics.record("ws", "success");
    ws.on_upgrade(move |socket| relay(socket, upstream))
}

async fn relay(
    downstream: WebSocket,
    upstream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) {
    let (mut down_tx, mut down_rx) = downstream.split();
    let (mut up_tx, mut up_rx) = upstream.split();

    loop {
        tokio::select! {
            frame = down_rx.next() => {
                match frame {
                    Some(Ok(msg)) => {
                        if let Some(converted) = axum_to_tungstenite(msg) {
                            if up_tx.send(converted).await.is_err() {
                                break;
                            }
                        }
                    }
                    _ => break,
                }
            }
            frame = up_rx.next() => {
                match frame {
                    Some(Ok(msg)) => {
                        if let Some(converted) = tungstenite_to_axum(msg) {
                            if down_tx.send(converted).await.is_err() {
                                break;
                            }
                        }
                    }
                    _ => break,
                }
            }
        }
    }

    let _ = down_tx.close().await;
    let _ = up_tx.close().await;
}

fn axum_to_tungstenite(msg: AxumMessage) -> Option<WsMessage> {
    match msg {
        AxumMessage::Text(text) => Some(WsMessage::Text(text)),
        AxumMessage::Binary(data) => Some(WsMessage::Binary(data)),
        AxumMessage::Ping(data) => Some(WsMessage::Ping(data)),
        AxumMessage::Pong(data) => Some(WsMessage::Pong(data)),
        AxumMessage::Close(_) => None,
    }
}

fn tungstenite_to_axum(msg: WsMessage) -> Option<AxumMessage> {
    match msg {
        WsMessage::Text(text) => Some(AxumMessage::Text(text)),
        WsMessage::Binary(data) => Some(AxumMessage::Binary(data)),
        WsMessage::Ping(data) => Some(AxumMessage::Ping(data)),
        WsMessage::Pong(data) => Some(AxumMessage::Pong(data)),
        WsMessage::Close(_) | WsMessage::Frame(_) => None,
    }
}
