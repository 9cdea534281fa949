//! Narrow clients for the relay's two external collaborators.
//!
//! Both are traits so deployments can swap transports without touching the
//! workers; the HTTP implementations here match the published interfaces
//! shape-for-shape.

pub mod tee;
pub mod verifier;

use thiserror::Error;

/// Upstream failure classification. Workers retry `Transient` with backoff
/// and give up immediately on `Permanent`.
#[derive(Debug, Error)]
pub enum ClientFault {
    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("permanent upstream failure: {0}")]
    Permanent(String),
}

pub(crate) fn classify_status(status: reqwest::StatusCode, body: String) -> ClientFault {
    if status.is_server_error() || status.as_u16() == 429 {
        ClientFault::Transient(format!("{status}: {body}"))
    } else {
        ClientFault::Permanent(format!("{status}: {body}"))
    }
}

impl From<reqwest::Error> for ClientFault {
    fn from(err: reqwest::Error) -> Self {
        // Network-level failures are all retryable.
        ClientFault::Transient(err.without_url().to_string())
    }
}
