mod context;
mod destination;
mod external;
mod forward;
mod internal;
mod locator;
mod metrics;

pub use context::{ExternalProxyState, InternalProxyState, INTERNAL_PROXY_PORT};
pub use destination::{from_host, from_path, Destination};
pub use external::router as external_router;
pub use internal::router as internal_router;
pub use locator::RunLocator;
pub use metrics::ProxyMetrics;
