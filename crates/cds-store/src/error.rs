use cds_types::BackendKind;

/// Errors from store sessions and their backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Read mode: the entry does not exist in the container.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// Write mode: the entry was already written in this session.
    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),

    /// The external name exceeds the backend's path ceiling.
    #[error("name too long ({len} > {max}): {name}")]
    PathTooLong { name: String, len: usize, max: usize },

    /// The external name is empty, absolute, or escapes the container.
    #[error("invalid entry name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// `open` was called while another entry is still open.
    #[error("an entry is already open: {0}")]
    AlreadyOpen(String),

    /// A stream operation was issued with no entry open.
    #[error("no entry is open")]
    NotOpen,

    /// The operation does not match the session's open mode.
    #[error("operation not allowed in {mode} mode: {operation}")]
    WrongMode {
        mode: cds_types::OpenMode,
        operation: &'static str,
    },

    /// The requested backend is not available for this target.
    #[error("backend not supported: {kind} ({reason})")]
    BackendUnsupported { kind: BackendKind, reason: String },

    /// The container is encrypted and no (or a wrong) password was supplied.
    #[error("password required to open encrypted entry: {0}")]
    PasswordRequired(String),

    /// Encryption or decryption failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The container could not be parsed.
    #[error("corrupt container: {0}")]
    Corrupt(String),

    /// `finalize` was called a second time.
    #[error("store finalized twice")]
    DoubleFinalize,

    /// An entry operation was issued after `finalize`.
    #[error("store already finalized")]
    Finalized,

    /// I/O error from the underlying medium.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Protocol violations are caller bugs, not medium failures.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::AlreadyOpen(_)
                | Self::NotOpen
                | Self::WrongMode { .. }
                | Self::DoubleFinalize
                | Self::Finalized
        )
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
