mod client;
mod driver;
mod error;
mod image_cache;

pub use client::DockerOnceCell;
pub use driver::ContainerDriver;
pub use error::DriverError;
pub use image_cache::ImagePullCache;
