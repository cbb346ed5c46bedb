/// Resolves a run id to the host its worker is reachable at (a container name in
/// single-host mode, a Kubernetes service DNS name in cluster mode). Injected so this
/// crate never depends on Docker or `kube` directly.
pub trait RunLocator: Send + Sync {
    fn host_for(&self, run_id: u64) -> Option<String>;
}
