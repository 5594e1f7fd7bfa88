//! Error taxonomy shared by the chunk store and blob sessions.

use std::io;
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Coarse classification of a [`GridError`].
///
/// Callers that only care about "what went wrong" rather than the exact
/// variant can match on this instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misconfiguration (bad collection name, bad chunk size). Never retried.
    Configuration,
    /// The backing collection failed a read or write.
    Storage,
    /// Lookup miss.
    NotFound,
    /// Downloaded bytes do not match the finalized record.
    Integrity,
    /// The source stream failed mid-upload.
    Upload,
    /// The destination sink failed mid-download.
    Download,
    /// The transfer was cancelled by the caller.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum GridError {
    #[error("collection `{0}` is not a files collection: name must end with `.files`")]
    InvalidCollectionName(String),
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    #[error("file `{0}` not found")]
    FileNotFound(Uuid),
    #[error("no chunks found for file `{0}`")]
    ChunksNotFound(Uuid),
    #[error("file `{0}` already exists")]
    AlreadyExists(Uuid),
    #[error("integrity check failed for file `{id}`: {reason}")]
    Integrity { id: Uuid, reason: String },
    #[error("upload aborted: {0}")]
    Upload(#[source] io::Error),
    #[error("download aborted: {0}")]
    Download(#[source] io::Error),
    #[error("transfer cancelled")]
    Cancelled,
    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub type GridResult<T> = Result<T, GridError>;

impl GridError {
    pub fn integrity(id: Uuid, reason: impl Into<String>) -> Self {
        Self::Integrity {
            id,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCollectionName(_) | Self::InvalidChunkSize => ErrorKind::Configuration,
            Self::FileNotFound(_) | Self::ChunksNotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) | Self::Storage(_) => ErrorKind::Storage,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::Upload(_) => ErrorKind::Upload,
            Self::Download(_) => ErrorKind::Download,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let id = Uuid::new_v4();
        assert_eq!(
            GridError::InvalidCollectionName("foo".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(GridError::FileNotFound(id).kind(), ErrorKind::NotFound);
        assert_eq!(GridError::integrity(id, "short").kind(), ErrorKind::Integrity);
        assert_eq!(
            GridError::Storage(StoreError::Backend("down".into())).kind(),
            ErrorKind::Storage
        );
        assert_eq!(
            GridError::Download(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).kind(),
            ErrorKind::Download
        );
    }

    #[test]
    fn messages_name_the_file() {
        let id = Uuid::new_v4();
        let msg = GridError::integrity(id, "expected 10 bytes, read 9").to_string();
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("expected 10 bytes"));
    }
}
