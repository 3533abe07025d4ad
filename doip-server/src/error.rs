//! Server-side error taxonomy surfaced in DOIP error envelopes.

use doip_wire::shard::ShardError;
use doip_wire::WireError;

/// Everything a handler or codec can report back to a peer.
///
/// The variant name (via [`DoipError::kind`]) is the `error` field of the
/// error envelope; the payload string becomes `message`. No internal paths
/// or stack traces belong in either.
#[derive(Debug, thiserror::Error)]
pub enum DoipError {
    #[error("{0}")]
    MalformedFrame(String),
    #[error("{0}")]
    Protocol(String),
    #[error("{0}")]
    UnsupportedOperation(String),
    #[error("{0}")]
    InvalidIdentifier(String),
    #[error("{0}")]
    ComponentNotFound(String),
    #[error("{0}")]
    StorageUnavailable(String),
    #[error("{0}")]
    Storage(String),
    #[error("{0}")]
    UpstreamTimeout(String),
}

impl DoipError {
    /// Wire identifier carried in the `error` field of error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedFrame(_) => "MalformedFrame",
            Self::Protocol(_) => "ProtocolError",
            Self::UnsupportedOperation(_) => "UnsupportedOperation",
            Self::InvalidIdentifier(_) => "InvalidIdentifier",
            Self::ComponentNotFound(_) => "ComponentNotFound",
            Self::StorageUnavailable(_) => "StorageUnavailable",
            Self::Storage(_) => "StorageError",
            Self::UpstreamTimeout(_) => "UpstreamTimeout",
        }
    }
}

impl From<WireError> for DoipError {
    fn from(err: WireError) -> Self {
        Self::MalformedFrame(err.to_string())
    }
}

impl From<ShardError> for DoipError {
    fn from(err: ShardError) -> Self {
        Self::InvalidIdentifier(err.to_string())
    }
}

/// Map a manifest-fetch transport failure onto the taxonomy.
pub fn from_reqwest(err: reqwest::Error) -> DoipError {
    if err.is_timeout() {
        DoipError::UpstreamTimeout(err.to_string())
    } else {
        DoipError::Storage(err.to_string())
    }
}
