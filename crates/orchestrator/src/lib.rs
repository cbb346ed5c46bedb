mod launcher;
mod orchestrator;

pub use launcher::{LaunchError, Launcher, LocalLauncher};
pub use orchestrator::Orchestrator;
