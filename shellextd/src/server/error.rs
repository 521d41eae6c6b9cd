use shellext_core::CloudError;
use thiserror::Error;

use crate::journal::JournalError;
use crate::paths::PathError;

/// Why a request was answered with the empty reply.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("payload is not a request")]
    UnsupportedPayload,
    #[error("no sync folder owns {0}")]
    FolderNotFound(String),
    #[error("no journal record for {0}")]
    RecordNotFound(String),
    #[error("journal record for {0} is unusable")]
    InvalidRecord(String),
    #[error("remote fetch failed: {0}")]
    RemoteFetchFailed(#[from] CloudError),
    #[error("preview has content type {0:?}, expected an image")]
    UnexpectedContentType(Option<String>),
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
    #[error("server is shutting down")]
    ShuttingDown,
}

impl From<PathError> for QueryError {
    fn from(err: PathError) -> Self {
        QueryError::InvalidRequest(err.to_string())
    }
}
