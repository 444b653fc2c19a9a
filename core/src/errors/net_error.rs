// core/src/errors/net_error.rs
use thiserror::Error;

/// Network failures.
///
/// The first three variants classify a single attempt; the rest are the
/// outcome of a whole logical call after the retry policy gave up.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("unable to connect: {0}")]
    Connection(String),

    #[error("timed out reading the response: {0}")]
    ReadTimeout(String),

    #[error("server responded with status {status}")]
    Http { status: u16, body_snippet: String },

    #[error("server rejected the request with status {status}")]
    Rejected { status: u16 },

    #[error("unable to authenticate (status {status})")]
    Unauthenticated { status: u16 },

    #[error("no response after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Option<Box<NetError>>,
    },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("response decode error")]
    Decode(#[source] serde_json::Error),
}

impl NetError {
    /// Whether another attempt may help, assuming default status policy.
    pub fn is_transient(&self) -> bool {
        match self {
            NetError::Connection(_) | NetError::ReadTimeout(_) => true,
            NetError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            NetError::Http { status, .. }
            | NetError::Rejected { status }
            | NetError::Unauthenticated { status } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NetError::ReadTimeout(e.to_string())
        } else {
            NetError::Connection(e.to_string())
        }
    }
}
