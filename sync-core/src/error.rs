use crate::transition::Transition;
use alert_registry::{AlertError, MalformedPayload};

/// Failure of a single CachetHQ call.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("request timed out: {0}")]
    Timeout(String),
    /// No connection was made, so nothing reached CachetHQ.
    #[error("could not connect: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("cachethq answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected cachethq response: {0}")]
    Decode(String),
}

impl ApiError {
    /// True when the failure proves CachetHQ did not act on the request.
    pub fn is_unapplied(&self) -> bool {
        match self {
            ApiError::Connect(_) => true,
            ApiError::Status { status, .. } => *status >= 500,
            ApiError::Timeout(_) | ApiError::Transport(_) | ApiError::Decode(_) => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The whole request was rejected; nothing was processed.
    #[error(transparent)]
    MalformedPayload(#[from] MalformedPayload),
    /// One alert of the batch was skipped.
    #[error(transparent)]
    Rejected(#[from] AlertError),
    /// The decided transition was not confirmed by CachetHQ; the cache was left as is.
    #[error("{action} for '{identity}' failed: {reason}")]
    RemoteSyncFailure {
        identity: String,
        action: Transition,
        #[source]
        reason: ApiError,
    },
}

impl SyncError {
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncError::RemoteSyncFailure { .. })
    }
}
