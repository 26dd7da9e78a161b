//! Entry cipher: XChaCha20-Poly1305 under a key derived from a password and
//! a per-container salt.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, CryptoResult};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const SALT_LEN: usize = 16;

const KEY_CONTEXT: &str = "cds 2026-01-01 entry encryption key v1";
const KEY_CHECK_LABEL: &[u8] = b"cds-key-check-v1";

/// Per-container entry key.
///
/// Zeroized on drop. Never logged: `Debug` prints a placeholder.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EntryKey([u8; KEY_LEN]);

impl EntryKey {
    /// Derive the key for `password` and `salt`.
    pub fn derive(password: &str, salt: &[u8; SALT_LEN]) -> Self {
        let mut material = Zeroizing::new(Vec::with_capacity(SALT_LEN + password.len()));
        material.extend_from_slice(salt);
        material.extend_from_slice(password.as_bytes());
        Self(blake3::derive_key(KEY_CONTEXT, &material))
    }

    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Value stored next to the salt so a wrong password is caught before
    /// any entry is decrypted.
    pub fn check_value(&self) -> [u8; 32] {
        *blake3::keyed_hash(&self.0, KEY_CHECK_LABEL).as_bytes()
    }

    /// Encrypt `plaintext` for the entry `name`. The name is bound as
    /// associated data, so moving ciphertext to another entry fails to
    /// decrypt.
    pub fn encrypt(&self, name: &str, plaintext: &[u8]) -> CryptoResult<(Vec<u8>, [u8; NONCE_LEN])> {
        let cipher = self.cipher()?;
        let nonce_bytes = generate_nonce();
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::Cipher(format!("encryption failed for {name}")))?;
        Ok((ciphertext, nonce_bytes))
    }

    /// Decrypt the entry `name`.
    pub fn decrypt(&self, name: &str, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        let cipher = self.cipher()?;
        cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::Authentication(name.to_string()))
    }

    fn cipher(&self) -> CryptoResult<XChaCha20Poly1305> {
        XChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|_| CryptoError::Cipher("invalid key length".into()))
    }
}

impl std::fmt::Debug for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryKey").field("key", &"[REDACTED]").finish()
    }
}

/// Fresh random salt for a new container.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Hex BLAKE3 digest of plaintext, recorded per entry in the manifest.
pub fn checksum(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SALT: [u8; SALT_LEN] = [7; SALT_LEN];

    #[test]
    fn derivation_is_deterministic_and_salted() {
        let a = EntryKey::derive("hunter2", &SALT);
        let b = EntryKey::derive("hunter2", &SALT);
        let c = EntryKey::derive("hunter2", &[8; SALT_LEN]);
        let d = EntryKey::derive("hunter3", &SALT);
        assert_eq!(a.check_value(), b.check_value());
        assert_ne!(a.check_value(), c.check_value());
        assert_ne!(a.check_value(), d.check_value());
    }

    #[test]
    fn encrypt_then_decrypt() {
        let key = EntryKey::derive("pw", &SALT);
        let (ciphertext, nonce) = key.encrypt("maindoc.xml", b"<doc/>").unwrap();
        assert_ne!(&ciphertext[..], b"<doc/>");
        assert_eq!(ciphertext.len(), 6 + 16);
        assert_eq!(key.decrypt("maindoc.xml", &nonce, &ciphertext).unwrap(), b"<doc/>");
    }

    #[test]
    fn nonces_are_fresh() {
        let key = EntryKey::derive("pw", &SALT);
        let (c1, n1) = key.encrypt("a", b"same").unwrap();
        let (c2, n2) = key.encrypt("a", b"same").unwrap();
        assert_ne!(n1, n2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn name_is_authenticated() {
        let key = EntryKey::derive("pw", &SALT);
        let (ciphertext, nonce) = key.encrypt("a.xml", b"data").unwrap();
        assert_eq!(
            key.decrypt("b.xml", &nonce, &ciphertext),
            Err(CryptoError::Authentication("b.xml".into()))
        );
    }

    #[test]
    fn wrong_key_fails() {
        let (ciphertext, nonce) = EntryKey::derive("right", &SALT).encrypt("a", b"x").unwrap();
        let wrong = EntryKey::derive("wrong", &SALT);
        assert!(wrong.decrypt("a", &nonce, &ciphertext).is_err());
    }

    #[test]
    fn debug_is_redacted() {
        let key = EntryKey::from_bytes([0xab; KEY_LEN]);
        let shown = format!("{key:?}");
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains("ab"));
    }

    #[test]
    fn checksum_is_blake3_hex() {
        assert_eq!(checksum(b"").len(), 64);
        assert_eq!(checksum(b"abc"), blake3::hash(b"abc").to_hex().to_string());
    }

    proptest! {
        #[test]
        fn any_entry_round_trips(
            name in "[a-z0-9/._-]{1,40}",
            data in proptest::collection::vec(any::<u8>(), 0..2048),
        ) {
            let key = EntryKey::derive("pw", &SALT);
            let (ciphertext, nonce) = key.encrypt(&name, &data).unwrap();
            prop_assert_eq!(ciphertext.len(), data.len() + 16);
            prop_assert_eq!(key.decrypt(&name, &nonce, &ciphertext).unwrap(), data);
        }

        #[test]
        fn flipped_bit_is_rejected(
            data in proptest::collection::vec(any::<u8>(), 1..512),
            index in any::<usize>(),
        ) {
            let key = EntryKey::derive("pw", &SALT);
            let (mut ciphertext, nonce) = key.encrypt("entry", &data).unwrap();
            let index = index % ciphertext.len();
            ciphertext[index] ^= 0x01;
            prop_assert!(key.decrypt("entry", &nonce, &ciphertext).is_err());
        }
    }
}
