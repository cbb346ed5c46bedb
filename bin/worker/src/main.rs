mod config;

use std::sync::Arc;

use clap::Parser;
use config::Config;
use connector::{Connector, RemoteConnector};
use driver::ContainerDriver;
use prometheus::Registry;

/// Drives exactly one run to completion, then exits with the run's outcome as its status
/// code: Kubernetes watches this container's exit status to know the run is done, the
/// same way the pod supervisor watches it from outside.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::parse();

    let connector: Arc<dyn Connector> = Arc::new(RemoteConnector::new(
        config.api_endpoint.clone(),
        config.connection_token.clone(),
    ));

    let proxy_state = Arc::new(proxy::InternalProxyState {
        shared_secret: config.connection_token.clone(),
        http: reqwest::Client::new(),
        metrics: proxy::ProxyMetrics::new(&Registry::new()),
    });
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    log::info!("internal proxy listening on {}", config.bind_addr);
    tokio::spawn(async move {
        let app = proxy::internal_router(proxy_state);
        if let Err(err) = axum::serve(listener, app).await {
            log::error!("internal proxy exited: {err}");
        }
    });

    let run_id = config.run_id;
    let run_info = match connector.init_run_get_info(run_id).await {
        Ok(run_info) => run_info,
        Err(err) => {
            log::error!("could not fetch run info for run {run_id}: {err}");
            let _ = connector.run_failed(run_id, &err.to_string()).await;
            std::process::exit(1);
        }
    };

    let driver = ContainerDriver::new();
    match driver.run(connector.as_ref(), &run_info, "127.0.0.1").await {
        Ok(()) => {
            log::info!("run {run_id} finished successfully");
            Ok(())
        }
        Err(err) => {
            log::error!("run {run_id} failed: {err}");
            let _ = connector.run_failed(run_id, &err.to_string()).await;
            std::process::exit(1);
        }
    }
}
