use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Runtime configuration for the control plane, assembled from environment variables
/// with a handful of operator-facing flags layered on top.
#[derive(Debug, Clone, Parser)]
#[command(name = "reproserver-control")]
pub struct Config {
    /// Address the control-plane HTTP server listens on.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: String,

    /// `local` runs the container driver in this process; `cluster` schedules worker pods.
    #[arg(long, env = "RUNNER_TYPE", default_value = "local", value_enum)]
    pub runner_type: RunnerType,

    /// Seconds to wait for in-flight work to finish after receiving a shutdown signal.
    #[arg(long, env = "TORNADO_SHUTDOWN_TIME", default_value_t = 30)]
    pub shutdown_time_secs: u64,

    /// Directory holding `runner.pod_spec` and `runner.namespace`, cluster mode only.
    #[arg(long, env = "K8S_CONFIG_DIR")]
    pub k8s_config_dir: Option<String>,

    /// Label selector identifying worker pods and their services, cluster mode only.
    #[arg(long, env = "RUN_LABEL_SELECTOR", default_value = "app=run")]
    pub run_label_selector: String,

    /// Overrides the runner container's image, cluster mode only (mainly for local dev).
    #[arg(long, env = "OVERRIDE_RUNNER_IMAGE")]
    pub override_runner_image: Option<String>,

    /// Shared secret validated on every runner-API and internal-proxy request.
    #[arg(long, env = "CONNECTION_TOKEN")]
    pub connection_token: String,

    /// Salt for the short-id codec used by the reverse proxy's addressing scheme.
    #[arg(long, env = "SHORTIDS_SALT")]
    pub shortids_salt: String,
}

impl Config {
    pub fn shutdown_time(&self) -> Duration {
        Duration::from_secs(self.shutdown_time_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum RunnerType {
    Local,
    Cluster,
}
