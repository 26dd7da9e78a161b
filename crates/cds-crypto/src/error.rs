use cds_store::StoreError;

/// Errors from entry encryption.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("no password set")]
    PasswordRequired,

    #[error("wrong password")]
    WrongPassword,

    /// The AEAD tag did not verify: wrong key, tampered ciphertext, or an
    /// entry renamed inside the container.
    #[error("authentication failed for entry {0}")]
    Authentication(String),

    #[error("integrity check failed for entry {name}: {reason}")]
    Integrity { name: String, reason: String },

    #[error("invalid encryption manifest: {0}")]
    Manifest(String),

    #[error("cipher failure: {0}")]
    Cipher(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

impl From<CryptoError> for StoreError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::PasswordRequired => StoreError::PasswordRequired(err.to_string()),
            CryptoError::WrongPassword
            | CryptoError::Authentication(_)
            | CryptoError::Cipher(_) => StoreError::Crypto(err.to_string()),
            CryptoError::Integrity { .. } | CryptoError::Manifest(_) => {
                StoreError::Corrupt(err.to_string())
            }
        }
    }
}
