//! The encryption manifest, written as the last entry of an encrypted
//! container.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cipher::{EntryKey, NONCE_LEN, SALT_LEN};
use crate::error::{CryptoError, CryptoResult};

/// Reserved entry name of the manifest.
pub const MANIFEST_ENTRY: &str = "META-INF/cds-encryption.json";

pub const MANIFEST_VERSION: u32 = 1;
pub const ALGORITHM: &str = "xchacha20poly1305";
pub const KDF: &str = "blake3-derive-key";

/// Per-entry record: what is needed to decrypt and verify one entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    /// Hex-encoded 24-byte nonce.
    pub nonce: String,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Hex BLAKE3 digest of the plaintext.
    pub checksum: String,
}

impl EntryRecord {
    pub fn nonce_bytes(&self) -> CryptoResult<[u8; NONCE_LEN]> {
        decode_fixed(&self.nonce, "nonce")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionManifest {
    pub version: u32,
    pub algorithm: String,
    pub kdf: String,
    pub salt: String,
    pub key_check: String,
    #[serde(default)]
    pub entries: BTreeMap<String, EntryRecord>,
}

impl EncryptionManifest {
    /// Empty manifest for a container keyed with `key`, derived from `salt`.
    pub fn new(salt: &[u8; SALT_LEN], key: &EntryKey) -> Self {
        Self {
            version: MANIFEST_VERSION,
            algorithm: ALGORITHM.to_string(),
            kdf: KDF.to_string(),
            salt: hex::encode(salt),
            key_check: hex::encode(key.check_value()),
            entries: BTreeMap::new(),
        }
    }

    pub fn to_json(&self) -> CryptoResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| CryptoError::Manifest(e.to_string()))
    }

    /// Parse and sanity-check a manifest.
    pub fn from_json(data: &[u8]) -> CryptoResult<Self> {
        let manifest: Self =
            serde_json::from_slice(data).map_err(|e| CryptoError::Manifest(e.to_string()))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(CryptoError::Manifest(format!(
                "unsupported version {}",
                manifest.version
            )));
        }
        if manifest.algorithm != ALGORITHM || manifest.kdf != KDF {
            return Err(CryptoError::Manifest(format!(
                "unsupported scheme {}/{}",
                manifest.algorithm, manifest.kdf
            )));
        }
        manifest.salt_bytes()?;
        Ok(manifest)
    }

    pub fn salt_bytes(&self) -> CryptoResult<[u8; SALT_LEN]> {
        decode_fixed(&self.salt, "salt")
    }

    /// Derive the key for `password` and check it against the stored value.
    pub fn unlock(&self, password: &str) -> CryptoResult<EntryKey> {
        let key = EntryKey::derive(password, &self.salt_bytes()?);
        if hex::encode(key.check_value()) != self.key_check {
            return Err(CryptoError::WrongPassword);
        }
        Ok(key)
    }

    pub fn record(&self, name: &str) -> Option<&EntryRecord> {
        self.entries.get(name)
    }
}

fn decode_fixed<const N: usize>(text: &str, field: &str) -> CryptoResult<[u8; N]> {
    let bytes = hex::decode(text).map_err(|e| CryptoError::Manifest(format!("{field}: {e}")))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        CryptoError::Manifest(format!("{field}: expected {N} bytes, got {}", bytes.len()))
    })
}
