mod error;
mod names;
mod supervisor;

pub use error::SupervisorError;
pub use names::{label_selector, pod_name, service_name, INTERNAL_PROXY_PORT, LABEL_APP, LABEL_APP_VALUE, LABEL_RUN};
pub use supervisor::PodSupervisor;
