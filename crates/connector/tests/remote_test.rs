use std::net::TcpListener;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use connector::{Connector, RemoteConnector};
use parking_lot::Mutex;

const SHARED_SECRET: &str = "test-secret";

#[derive(Default)]
struct Recorded {
    started_runs: Vec<u64>,
}

async fn start_mock_server(state: Arc<Mutex<Recorded>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();
    let listener = tokio::net::TcpListener::from_std(listener).unwrap();

    let app = Router::new()
        .route(
            "/runners/run/:id/start",
            post(
                |State(state): State<Arc<Mutex<Recorded>>>,
                 axum::extract::Path(id): axum::extract::Path<u64>,
                 headers: HeaderMap| async move {
                    if headers
                        .get("X-Reproserver-Authenticate")
                        .and_then(|v| v.to_str().ok())
                        != Some(SHARED_SECRET)
                    {
                        return StatusCode::FORBIDDEN;
                    }
                    state.lock().started_runs.push(id);
                    StatusCode::NO_CONTENT
                },
            ),
        )
        .with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

#[tokio::test]
async fn run_started_reaches_the_control_plane() {
    let state = Arc::new(Mutex::new(Recorded::default()));
    let base_url = start_mock_server(state.clone()).await;

    let connector = RemoteConnector::new(base_url, SHARED_SECRET);
    connector.run_started(42).await.unwrap();

    assert_eq!(state.lock().started_runs, vec![42]);
}

#[tokio::test]
async fn mismatched_shared_secret_is_forbidden() {
    let state = Arc::new(Mutex::new(Recorded::default()));
    let base_url = start_mock_server(state.clone()).await;

    let connector = RemoteConnector::new(base_url, "wrong-secret");
    let err = connector.run_started(42).await.unwrap_err();

    assert_eq!(err.to_string(), "unauthenticated connector request");
    assert!(state.lock().started_runs.is_empty());
}
