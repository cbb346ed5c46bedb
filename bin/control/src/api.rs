use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{post, put};
use axum::Router;
use connector::{Connector, ConnectorError};
use serde::{Deserialize, Serialize};

const AUTH_HEADER: &str = "x-reproserver-authenticate";

pub struct ApiState {
    pub connector: Arc<dyn Connector>,
    pub connection_token: String,
}

/// The internal HTTP API a runner (worker) calls back into the control plane through,
/// one route per `Connector` operation, matching the reference tornado handlers'
/// status-code conventions one for one.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/runners/run/:id/init", post(init))
        .route("/runners/run/:id/start", post(start))
        .route("/runners/run/:id/set-progress", post(set_progress))
        .route("/runners/run/:id/done", post(done))
        .route("/runners/run/:id/failed", post(failed))
        .route("/runners/run/:id/output/:name", put(output))
        .route("/runners/run/:id/log", post(log_lines))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

fn check_auth(state: &ApiState, headers: &HeaderMap) -> Result<(), Response> {
    let provided = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());
    if provided == Some(state.connection_token.as_str()) {
        Ok(())
    } else {
        Err(error_response(StatusCode::FORBIDDEN, "Unauthenticated"))
    }
}

fn parse_run_id(raw: &str) -> Result<u64, Response> {
    raw.parse()
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid run id"))
}

fn connector_error_response(err: ConnectorError) -> Response {
    match err {
        ConnectorError::Forbidden => error_response(StatusCode::FORBIDDEN, err.to_string()),
        ConnectorError::BadRequest(_) | ConnectorError::UnknownRun(_) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

#[derive(Deserialize)]
struct Empty {}

async fn init(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(raw_id): Path<String>,
    Json(_body): Json<Empty>,
) -> Response {
    if let Err(response) = check_auth(&state, &headers) {
        return response;
    }
    let run_id = match parse_run_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.connector.init_run_get_info(run_id).await {
        Ok(run_info) => Json(run_info).into_response(),
        Err(err) => connector_error_response(err),
    }
}

async fn start(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(raw_id): Path<String>,
    Json(_body): Json<Empty>,
) -> Response {
    if let Err(response) = check_auth(&state, &headers) {
        return response;
    }
    let run_id = match parse_run_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.connector.run_started(run_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => connector_error_response(err),
    }
}

#[derive(Deserialize)]
struct ProgressBody {
    percent: u8,
    text: String,
}

async fn set_progress(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(raw_id): Path<String>,
    Json(body): Json<ProgressBody>,
) -> Response {
    if let Err(response) = check_auth(&state, &headers) {
        return response;
    }
    let run_id = match parse_run_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state
        .connector
        .run_progress(run_id, body.percent, &body.text)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => connector_error_response(err),
    }
}

async fn done(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(raw_id): Path<String>,
    Json(_body): Json<Empty>,
) -> Response {
    if let Err(response) = check_auth(&state, &headers) {
        return response;
    }
    let run_id = match parse_run_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.connector.run_done(run_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => connector_error_response(err),
    }
}

#[derive(Deserialize)]
struct FailedBody {
    error: String,
}

async fn failed(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(raw_id): Path<String>,
    Json(body): Json<FailedBody>,
) -> Response {
    if let Err(response) = check_auth(&state, &headers) {
        return response;
    }
    let run_id = match parse_run_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.connector.run_failed(run_id, &body.error).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => connector_error_response(err),
    }
}

async fn output(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path((raw_id, name)): Path<(String, String)>,
    body: axum::body::Bytes,
) -> Response {
    if let Err(response) = check_auth(&state, &headers) {
        return response;
    }
    let run_id = match parse_run_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state
        .connector
        .upload_output_file(run_id, &name, body.to_vec(), None)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => connector_error_response(err),
    }
}

#[derive(Deserialize)]
struct LogLineBody {
    msg: String,
    #[allow(dead_code)]
    time: String,
}

#[derive(Deserialize)]
struct LogBody {
    lines: Vec<LogLineBody>,
}

async fn log_lines(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(raw_id): Path<String>,
    Json(body): Json<LogBody>,
) -> Response {
    if let Err(response) = check_auth(&state, &headers) {
        return response;
    }
    let run_id = match parse_run_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let lines: Vec<String> = body.lines.into_iter().map(|line| line.msg).collect();
    match state.connector.log_multiple(run_id, &lines).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => connector_error_response(err),
    }
}
