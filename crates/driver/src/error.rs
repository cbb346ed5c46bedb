use std::fmt;

use connector::ConnectorError;

/// Errors raised while driving a single run's container. All variants are fatal to the
/// run; the orchestrator (not this crate) is responsible for translating them into a
/// `run_failed` call.
#[derive(Debug)]
pub enum DriverError {
    Docker(bollard::errors::Error),
    Connector(ConnectorError),
    Http(reqwest::Error),
    Io(std::io::Error),
    UnsupportedExtraConfig(Vec<String>),
    ScriptFailed(i64),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Docker(err) => write!(f, "container daemon error: {err}"),
            DriverError::Connector(err) => write!(f, "connector error: {err}"),
            DriverError::Http(err) => write!(f, "http error: {err}"),
            DriverError::Io(err) => write!(f, "i/o error: {err}"),
            DriverError::UnsupportedExtraConfig(features) => write!(
                f,
                "Unsupported required extra config: {}",
                features.join(", ")
            ),
            DriverError::ScriptFailed(code) => {
                write!(f, "Error: container returned {code}")
            }
        }
    }
}

impl std::error::Error for DriverError {}

impl From<bollard::errors::Error> for DriverError {
    fn from(err: bollard::errors::Error) -> Self {
        DriverError::Docker(err)
    }
}

impl From<ConnectorError> for DriverError {
    fn from(err: ConnectorError) -> Self {
        DriverError::Connector(err)
    }
}

impl From<reqwest::Error> for DriverError {
    fn from(err: reqwest::Error) -> Self {
        DriverError::Http(err)
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::Io(err)
    }
}
