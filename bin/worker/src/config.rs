use clap::Parser;

/// Runtime configuration for a worker pod's entrypoint: one invocation drives exactly
/// one run, identified by `run_id`, then exits.
#[derive(Debug, Clone, Parser)]
#[command(name = "reproserver-worker")]
pub struct Config {
    /// Numeric id of the run this pod was scheduled to drive.
    pub run_id: u64,

    /// Base URL of the control plane's internal runner API.
    #[arg(long, env = "API_ENDPOINT")]
    pub api_endpoint: String,

    /// Shared secret presented on every runner-API and internal-proxy request.
    #[arg(long, env = "CONNECTION_TOKEN")]
    pub connection_token: String,

    /// Address the internal proxy sidecar listens on.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:5597")]
    pub bind_addr: String,
}
