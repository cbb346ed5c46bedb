use std::fmt;

#[derive(Debug)]
pub enum SupervisorError {
    Kube(kube::Error),
    Watcher(kube::runtime::watcher::Error),
    Connector(connector::ConnectorError),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::Kube(err) => write!(f, "kubernetes api error: {err}"),
            SupervisorError::Watcher(err) => write!(f, "pod watch error: {err}"),
            SupervisorError::Connector(err) => write!(f, "connector error: {err}"),
        }
    }
}

impl std::error::Error for SupervisorError {}

impl From<kube::Error> for SupervisorError {
    fn from(err: kube::Error) -> Self {
        SupervisorError::Kube(err)
    }
}

impl From<kube::runtime::watcher::Error> for SupervisorError {
    fn from(err: kube::runtime::watcher::Error) -> Self {
        SupervisorError::Watcher(err)
    }
}

impl From<connector::ConnectorError> for SupervisorError {
    fn from(err: connector::ConnectorError) -> Self {
        SupervisorError::Connector(err)
    }
}
