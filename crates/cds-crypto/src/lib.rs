//! Password-based encryption for compound document stores.
//!
//! An encrypted container is an ordinary archive whose entries hold
//! XChaCha20-Poly1305 ciphertext, plus a JSON manifest
//! ([`MANIFEST_ENTRY`]) that records the key-derivation salt, a key check
//! value, and a nonce, size, and BLAKE3 checksum per entry.
//!
//! # Rules
//!
//! 1. Every entry gets a fresh random nonce and is bound to its name.
//! 2. The key is derived once per container and zeroized on drop.
//! 3. A container read without a manifest is not encrypted and needs no
//!    password.

pub mod cipher;
pub mod encrypted;
pub mod error;
pub mod manifest;

pub use cipher::{checksum, generate_salt, EntryKey, KEY_LEN, NONCE_LEN, SALT_LEN};
pub use encrypted::EncryptedBackend;
pub use error::{CryptoError, CryptoResult};
pub use manifest::{EncryptionManifest, EntryRecord, MANIFEST_ENTRY};
