//! Client-side error taxonomy.
//!
//! Every boundary error is a typed variant carrying a developer-facing
//! detail; the user-actionable routing lives in [`ErrorCategory`]. Details
//! never include witness content, plaintext, or derived keys.

use thiserror::Error;
use tribune_protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no session credential; register first")]
    CredentialMissing,

    #[error("session credential has expired")]
    CredentialExpired,

    #[error("rate limited")]
    RateLimited,

    #[error("unauthorized")]
    Unauthorized,

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("action already performed for this recipient")]
    DuplicateAction,

    #[error("coordinates could not be resolved")]
    InvalidCoords,

    #[error("no district covers the given location")]
    DistrictNotFound,

    #[error("identity commitment is already registered")]
    DuplicateRegistration,

    #[error("registry tree is rebuilding")]
    TreeRebuilding,

    #[error("invalid witness: {0}")]
    WitnessInvalid(String),

    #[error("prover initialization failed: {0}")]
    InitFailed(String),

    #[error("a proof is already being generated")]
    ProverBusy,

    #[error("cancelled")]
    Cancelled,

    #[error("failed to fetch TEE public key: {0}")]
    KeyFetchFailed(String),

    #[error("TEE public key has expired")]
    KeyExpired,

    #[error("encryption failed: {0}")]
    EncryptFailed(String),

    #[error("a send is already in progress")]
    Busy,

    #[error("network error: {0}")]
    Network(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("keystore error: {0}")]
    Keystore(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// How the UI should route an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ClientBug,
    Reverify,
    Backoff,
    Reauth,
    Blocked,
    AlreadyDone,
    RetryableLocal,
    Transient,
    UserCancelled,
    Opaque,
}

impl ClientError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::InvalidInput(_) | ClientError::WitnessInvalid(_) => {
                ErrorCategory::ClientBug
            }
            ClientError::CredentialMissing
            | ClientError::CredentialExpired
            | ClientError::DistrictNotFound
            | ClientError::InvalidCoords => ErrorCategory::Reverify,
            ClientError::RateLimited => ErrorCategory::Backoff,
            ClientError::Unauthorized => ErrorCategory::Reauth,
            ClientError::PolicyViolation(_) | ClientError::DuplicateRegistration => {
                ErrorCategory::Blocked
            }
            ClientError::DuplicateAction => ErrorCategory::AlreadyDone,
            ClientError::ProverBusy | ClientError::InitFailed(_) | ClientError::Busy => {
                ErrorCategory::RetryableLocal
            }
            ClientError::Network(_)
            | ClientError::TreeRebuilding
            | ClientError::KeyFetchFailed(_)
            | ClientError::KeyExpired => ErrorCategory::Transient,
            ClientError::Cancelled => ErrorCategory::UserCancelled,
            ClientError::Server(_)
            | ClientError::EncryptFailed(_)
            | ClientError::Keystore(_)
            | ClientError::Internal(_) => ErrorCategory::Opaque,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self.category() {
            ErrorCategory::ClientBug => "something went wrong with your request",
            ErrorCategory::Reverify => "please verify your identity again",
            ErrorCategory::Backoff => "too many attempts, please wait",
            ErrorCategory::Reauth => "please sign in",
            ErrorCategory::Blocked => "action not allowed for this campaign",
            ErrorCategory::AlreadyDone => "you've already sent this to this recipient",
            ErrorCategory::RetryableLocal => "please try again",
            ErrorCategory::Transient => "connection issue, retrying",
            ErrorCategory::UserCancelled => "",
            ErrorCategory::Opaque => "an unexpected error occurred",
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::WitnessInvalid(msg) => ClientError::WitnessInvalid(msg),
            other => ClientError::InvalidInput(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        // Strip URLs from the detail; query strings can carry coordinates.
        if err.is_timeout() {
            ClientError::Network("request timed out".into())
        } else if err.is_connect() {
            ClientError::Network("connection failed".into())
        } else {
            ClientError::Network(err.without_url().to_string())
        }
    }
}
