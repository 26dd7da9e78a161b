use thiserror::Error;

/// Errors produced when parsing foundation types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown backend kind: {0}")]
    UnknownBackend(String),

    #[error("unknown open mode: {0}")]
    UnknownMode(String),
}
