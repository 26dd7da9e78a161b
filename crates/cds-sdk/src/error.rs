use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid store location {location:?}: {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("no transport configured for remote location {0}")]
    NoTransport(String),

    #[error("transfer of {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] cds_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SdkResult<T> = Result<T, SdkError>;
