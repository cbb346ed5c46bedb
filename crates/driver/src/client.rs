use std::sync::Arc;

use bollard::Docker;
use tokio::sync::OnceCell;

/// Process-wide Docker connection, lazily established on first use and reused by every
/// run the driver handles.
#[derive(Clone)]
pub struct DockerOnceCell {
    cell: Arc<OnceCell<Docker>>,
}

impl DockerOnceCell {
    pub fn new() -> Self {
        DockerOnceCell {
            cell: Arc::new(OnceCell::new()),
        }
    }

    pub async fn get(&self) -> Result<&Docker, bollard::errors::Error> {
        self.cell
            .get_or_try_init(|| async { Docker::connect_with_local_defaults() })
            .await
    }
}

impl Default for DockerOnceCell {
    fn default() -> Self {
        Self::new()
    }
}
