use proxy::RunLocator;

/// Resolves a run id to the Docker container name the single-host driver created for it.
/// Works because the control plane and every run's container share one Docker network.
pub struct LocalRunLocator;

impl RunLocator for LocalRunLocator {
    fn host_for(&self, run_id: u64) -> Option<String> {
        Some(format!("run_{run_id}"))
    }
}

/// Resolves a run id to the Kubernetes service created alongside its worker pod; plain
/// service name resolves within the namespace via cluster DNS.
pub struct ClusterRunLocator;

impl RunLocator for ClusterRunLocator {
    fn host_for(&self, run_id: u64) -> Option<String> {
        Some(supervisor::service_name(run_id))
    }
}
