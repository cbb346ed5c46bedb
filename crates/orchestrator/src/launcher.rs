use async_trait::async_trait;
use connector::RunInfo;

/// Gets a validated run's container actually running. The orchestrator owns the
/// in-flight bookkeeping; a `Launcher` only knows how to start the work.
///
/// `Local` runs the container driver in this process. A cluster strategy (creating a
/// worker pod whose entrypoint builds a remote connector and invokes the driver there)
/// is supplied by the binary that wires up `kube`, since this crate stays free of any
/// dependency on the cluster API.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, run_info: &RunInfo) -> Result<(), LaunchError>;
}

#[derive(Debug)]
pub struct LaunchError(pub Box<dyn std::error::Error + Send + Sync>);

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

impl From<driver::DriverError> for LaunchError {
    fn from(err: driver::DriverError) -> Self {
        LaunchError(Box::new(err))
    }
}

impl From<connector::ConnectorError> for LaunchError {
    fn from(err: connector::ConnectorError) -> Self {
        LaunchError(Box::new(err))
    }
}

/// Runs the container driver in-process, binding exposed ports to all interfaces —
/// used when the control plane and every run share one host (`docker-compose`-style
/// deployment).
pub struct LocalLauncher {
    driver: driver::ContainerDriver,
    connector: std::sync::Arc<dyn connector::Connector>,
}

impl LocalLauncher {
    pub fn new(connector: std::sync::Arc<dyn connector::Connector>) -> Self {
        LocalLauncher {
            driver: driver::ContainerDriver::new(),
            connector,
        }
    }
}

#[async_trait]
impl Launcher for LocalLauncher {
    async fn launch(&self, run_info: &RunInfo) -> Result<(), LaunchError> {
        self.driver
            .run(self.connector.as_ref(), run_info, "0.0.0.0")
            .await?;
        Ok(())
    }
}
