use std::sync::Arc;

use shortid::MultiShortIds;

use crate::locator::RunLocator;
use crate::metrics::ProxyMetrics;

/// Port the internal proxy sidecar listens on inside a worker, whether that worker is a
/// local container or a cluster pod.
pub const INTERNAL_PROXY_PORT: u16 = 5597;

/// Shared state for the external-facing proxy: resolves run short ids, finds the worker
/// host for a run, and forwards to its internal proxy.
pub struct ExternalProxyState {
    pub shared_secret: String,
    pub locator: Arc<dyn RunLocator>,
    pub codec: Arc<MultiShortIds>,
    pub http: reqwest::Client,
    pub metrics: ProxyMetrics,
}

/// Shared state for the internal proxy sidecar running alongside a worker: checks the
/// shared secret and forwards to the port the contained app actually listens on.
pub struct InternalProxyState {
    pub shared_secret: String,
    pub http: reqwest::Client,
    pub metrics: ProxyMetrics,
}
