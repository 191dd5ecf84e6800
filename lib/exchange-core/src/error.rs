use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Failures that terminate an exchange before (or while) it is proxied
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Registry cache not synchronized yet; retry later
    #[error("{0}")]
    NotReady(String),

    #[error("no cluster id is {0}")]
    UnknownCluster(String),

    #[error("{0}")]
    InvalidRequest(String),

    /// Cluster needs its tunnel but the agent has no live session
    #[error("cannot proxy through cluster {0}, whose agent is disconnected")]
    Disconnected(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Transport-level failure while talking to the destination
    #[error("Proxy error: {0}")]
    Proxy(String),
}

/// HTTP-semantic category an error is reported under
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    BadRequest,
    ServiceUnavailable,
    InternalError,
    BadGateway,
}

impl ExchangeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ExchangeError::UnknownCluster(_)
            | ExchangeError::InvalidRequest(_)
            | ExchangeError::Disconnected(_) => ErrorCategory::BadRequest,
            ExchangeError::NotReady(_) | ExchangeError::Unavailable(_) => {
                ErrorCategory::ServiceUnavailable
            }
            ExchangeError::Internal(_) => ErrorCategory::InternalError,
            ExchangeError::Proxy(_) => ErrorCategory::BadGateway,
        }
    }

    /// Short label used in logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            ExchangeError::NotReady(_) => "not_ready",
            ExchangeError::UnknownCluster(_) => "unknown_cluster",
            ExchangeError::InvalidRequest(_) => "invalid_request",
            ExchangeError::Disconnected(_) => "disconnected",
            ExchangeError::Unavailable(_) => "unavailable",
            ExchangeError::Internal(_) => "internal",
            ExchangeError::Proxy(_) => "proxy",
        }
    }

    /// Whether the caller may succeed by retrying without changing the request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::NotReady(_)
                | ExchangeError::Disconnected(_)
                | ExchangeError::Unavailable(_)
        )
    }
}
