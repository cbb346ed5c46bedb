mod api;
mod cluster_launcher;
mod config;
mod health;
mod locator;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use clap::Parser;
use config::{Config, RunnerType};
use connector::{Connector, DirectConnector, InMemoryObjectStore, InMemoryRunStore};
use orchestrator::{LocalLauncher, Orchestrator};
use prometheus::{IntGauge, Registry};
use shortid::MultiShortIds;
use tower_http::trace::TraceLayer;

const SHORTID_MIN_CHARS: usize = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::parse();

    let registry = Registry::new();
    let in_flight_gauge = IntGauge::new(
        "reproserver_runs_in_flight",
        "Number of runs currently executing",
    )?;
    registry.register(Box::new(in_flight_gauge.clone()))?;

    let run_store = Arc::new(InMemoryRunStore::new());
    let object_store = Arc::new(InMemoryObjectStore::new());
    let connector: Arc<dyn Connector> =
        Arc::new(DirectConnector::new(run_store.clone(), object_store.clone()));

    let draining = Arc::new(health::Draining::new());

    let (launcher, run_locator, supervisor_handle): (
        Arc<dyn orchestrator::Launcher>,
        Arc<dyn proxy::RunLocator>,
        Option<tokio::task::JoinHandle<()>>,
    ) = match config.runner_type {
        RunnerType::Local => (
            Arc::new(LocalLauncher::new(connector.clone())),
            Arc::new(locator::LocalRunLocator),
            None,
        ),
        RunnerType::Cluster => {
            let k8s_config_dir = config
                .k8s_config_dir
                .clone()
                .ok_or_else(|| anyhow::anyhow!("K8S_CONFIG_DIR is required for RUNNER_TYPE=cluster"))?;
            let pod_spec_path = std::path::Path::new(&k8s_config_dir).join("runner.pod_spec");
            let namespace_path = std::path::Path::new(&k8s_config_dir).join("runner.namespace");
            let pod_spec: serde_yaml::Value =
                serde_yaml::from_str(&std::fs::read_to_string(&pod_spec_path)?)?;
            let namespace = std::fs::read_to_string(&namespace_path)?.trim().to_string();

            let client = kube::Client::try_default().await?;
            let launcher = Arc::new(cluster_launcher::ClusterLauncher::new(
                client.clone(),
                namespace.clone(),
                pod_spec,
                config.override_runner_image.clone(),
            ));

            let supervisor_gauge = IntGauge::new(
                "reproserver_pods_in_flight",
                "Number of worker pods currently running",
            )?;
            registry.register(Box::new(supervisor_gauge.clone()))?;
            let supervisor = Arc::new(supervisor::PodSupervisor::new(
                client,
                namespace,
                connector.clone(),
                supervisor_gauge,
            ));
            let supervisor_task = tokio::spawn(async move {
                if let Err(err) = supervisor.run().await {
                    log::error!("pod supervisor exited: {err}");
                }
            });

            (
                launcher,
                Arc::new(locator::ClusterRunLocator) as Arc<dyn proxy::RunLocator>,
                Some(supervisor_task),
            )
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(
        connector.clone(),
        launcher,
        in_flight_gauge,
    ));

    let codec = Arc::new(MultiShortIds::new(config.shortids_salt.clone(), SHORTID_MIN_CHARS));
    let proxy_metrics = proxy::ProxyMetrics::new(&registry);
    let external_state = Arc::new(proxy::ExternalProxyState {
        shared_secret: config.connection_token.clone(),
        locator: run_locator,
        codec,
        http: reqwest::Client::new(),
        metrics: proxy_metrics,
    });

    let api_state = Arc::new(api::ApiState {
        connector: connector.clone(),
        connection_token: config.connection_token.clone(),
    });
    let launch_state = LaunchState { orchestrator };
    let launch_router = Router::new()
        .route("/runs/:id/launch", post(launch_run))
        .with_state(launch_state);

    let proxy_router = proxy::external_router(external_state);

    let app = Router::new()
        .merge(api::router(api_state))
        .merge(launch_router)
        .merge(health::metrics_router(registry))
        .layer(TraceLayer::new_for_http())
        .merge(health::health_router(draining.clone(), proxy_router.clone()))
        .fallback_service(proxy_router);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    log::info!("control plane listening on {}", config.bind_addr);

    let shutdown_time = config.shutdown_time();
    let draining_for_signal = draining.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            draining_for_signal.set();
            log::info!("draining, will exit in {shutdown_time:?}");
            tokio::time::sleep(shutdown_time).await;
        })
        .await?;

    if let Some(handle) = supervisor_handle {
        handle.abort();
    }

    Ok(())
}

#[derive(Clone)]
struct LaunchState {
    orchestrator: Arc<Orchestrator>,
}

/// The seam the (out-of-scope) web layer calls once it has persisted a run row: kicks
/// off the orchestrator and returns immediately.
async fn launch_run(
    State(state): State<LaunchState>,
    Path(run_id): Path<u64>,
) -> impl IntoResponse {
    match state.orchestrator.run(run_id).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(err) => {
            log::warn!("failed to launch run {run_id}: {err}");
            StatusCode::BAD_REQUEST
        }
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
