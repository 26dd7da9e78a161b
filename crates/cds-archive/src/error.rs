use std::io;

use cds_store::StoreError;
use thiserror::Error;
use zip::result::ZipError;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("zip error: {0}")]
    Zip(#[from] ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a valid {format} archive: {reason}")]
    InvalidFormat { format: &'static str, reason: String },

    #[error("archive entries must be buffered: {0}")]
    UnbufferedEntry(String),

    #[error("archive already sealed")]
    Sealed,
}

impl From<ArchiveError> for StoreError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Io(e) | ArchiveError::Zip(ZipError::Io(e)) => StoreError::Io(e),
            ArchiveError::Zip(e) => StoreError::Corrupt(e.to_string()),
            ArchiveError::InvalidFormat { .. } => StoreError::Corrupt(err.to_string()),
            ArchiveError::UnbufferedEntry(_) | ArchiveError::Sealed => {
                StoreError::Io(io::Error::other(err.to_string()))
            }
        }
    }
}
