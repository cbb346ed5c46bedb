use std::fmt;

/// Error kinds crossing the connector boundary, matching the classification in the
/// error-handling design: user errors carry a descriptive message and map to a 4xx at
/// the internal API, everything else is treated as an infrastructure failure.
#[derive(Debug)]
pub enum ConnectorError {
    UnknownRun(u64),
    BadRequest(String),
    Forbidden,
    Store(String),
    Io(std::io::Error),
    Http(String),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::UnknownRun(id) => write!(f, "unknown run {id}"),
            ConnectorError::BadRequest(msg) => write!(f, "{msg}"),
            ConnectorError::Forbidden => write!(f, "unauthenticated connector request"),
            ConnectorError::Store(msg) => write!(f, "store error: {msg}"),
            ConnectorError::Io(err) => write!(f, "i/o error: {err}"),
            ConnectorError::Http(msg) => write!(f, "http error: {msg}"),
        }
    }
}

impl std::error::Error for ConnectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectorError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConnectorError {
    fn from(err: std::io::Error) -> Self {
        ConnectorError::Io(err)
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        ConnectorError::Http(err.to_string())
    }
}

impl ConnectorError {
    /// True for errors that should be surfaced as the run's terminal log line rather
    /// than bubbled up as a bare process error (user errors and bundle errors, per the
    /// error-handling design).
    pub fn is_user_facing(&self) -> bool {
        matches!(self, ConnectorError::BadRequest(_) | ConnectorError::UnknownRun(_))
    }
}
