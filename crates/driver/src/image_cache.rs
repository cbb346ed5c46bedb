use std::collections::HashMap;
use std::sync::Arc;

use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::error::DriverError;

/// Debounces concurrent pulls of the same image: two runs that land on the same worker at
/// the same time and need the same experiment image share a single `docker pull`.
#[derive(Clone, Default)]
pub struct ImagePullCache {
    inner: Arc<Mutex<HashMap<String, Arc<OnceCell<()>>>>>,
}

impl ImagePullCache {
    pub fn new() -> Self {
        ImagePullCache::default()
    }

    pub async fn pull(&self, docker: &Docker, image: &str) -> Result<(), DriverError> {
        let cell = {
            let mut inner = self.inner.lock();
            inner.entry(image.to_string()).or_default().clone()
        };

        cell.get_or_try_init(|| pull_image(docker, image)).await?;
        Ok(())
    }
}

async fn pull_image(docker: &Docker, image: &str) -> Result<(), DriverError> {
    log::info!("pulling image {image}");
    let options = CreateImageOptions {
        from_image: image,
        ..Default::default()
    };
    let mut stream = docker.create_image(Some(options), None, None);
    while let Some(status) = stream.next().await {
        status?;
    }
    Ok(())
}
