use std::io::{Read, Write};

use cds_store::{
    read_stream_from_bytes, Backend, ReadStream, StoreError, StoreResult, WriteStream,
};
use cds_types::OpenMode;
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

use crate::cipher::{checksum, generate_salt, EntryKey, SALT_LEN};
use crate::error::CryptoError;
use crate::manifest::{EncryptionManifest, EntryRecord, MANIFEST_ENTRY};

/// Encrypted container layered over another backend, normally ZIP.
///
/// Write mode encrypts every entry on close and writes the manifest during
/// `finalize_store`, before the inner container is sealed. Read mode loads
/// the manifest up front; a container without one is served as-is, with no
/// password needed.
///
/// Entries not listed in the manifest (such as the ZIP `mimetype` tag) are
/// stored and read in the clear.
pub struct EncryptedBackend<B> {
    inner: B,
    password: Option<Zeroizing<String>>,
    key: Option<EntryKey>,
    salt: [u8; SALT_LEN],
    manifest: Option<EncryptionManifest>,
}

impl<B: Backend> EncryptedBackend<B> {
    /// Wrap `inner`. In Read mode the manifest is loaded now; a malformed one
    /// fails the open.
    pub fn new(mut inner: B) -> StoreResult<Self> {
        let manifest = match inner.mode() {
            OpenMode::Read if inner.file_exists(MANIFEST_ENTRY) => {
                let (mut stream, _) = inner.open_read(MANIFEST_ENTRY)?;
                let mut json = Vec::new();
                stream.read_to_end(&mut json)?;
                inner.close_read(MANIFEST_ENTRY, stream)?;
                let manifest = EncryptionManifest::from_json(&json)?;
                debug!(entries = manifest.entries.len(), "encryption manifest loaded");
                Some(manifest)
            }
            OpenMode::Read => {
                debug!(backend = inner.name(), "no encryption manifest, serving plain container");
                None
            }
            OpenMode::Write => None,
        };
        Ok(Self {
            inner,
            password: None,
            key: None,
            salt: generate_salt(),
            manifest,
        })
    }

    /// Wrap `inner` and set `password` right away.
    pub fn with_password(inner: B, password: &str) -> StoreResult<Self> {
        let mut backend = Self::new(inner)?;
        if !backend.set_password(password) {
            return Err(CryptoError::WrongPassword.into());
        }
        Ok(backend)
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Plain passthrough: a Read-mode container that carries no manifest.
    fn is_plain(&self) -> bool {
        self.inner.mode() == OpenMode::Read && self.manifest.is_none()
    }

    fn key(&self, name: &str) -> StoreResult<&EntryKey> {
        self.key.as_ref().ok_or_else(|| {
            warn!(name, "encrypted entry requested without a password");
            StoreError::PasswordRequired(name.to_string())
        })
    }

    fn reserved(name: &str) -> StoreError {
        StoreError::InvalidName {
            name: name.to_string(),
            reason: "reserved for the encryption manifest".to_string(),
        }
    }
}

impl<B: Backend> Backend for EncryptedBackend<B> {
    fn name(&self) -> &'static str {
        "encrypted"
    }

    fn mode(&self) -> OpenMode {
        self.inner.mode()
    }

    fn open_write(&mut self, name: &str) -> StoreResult<WriteStream> {
        if self.inner.mode() != OpenMode::Write {
            return Err(StoreError::WrongMode {
                mode: OpenMode::Read,
                operation: "open_write",
            });
        }
        if name == MANIFEST_ENTRY {
            return Err(Self::reserved(name));
        }
        self.key(name)?;
        if self.inner.file_exists(name) {
            return Err(StoreError::DuplicateEntry(name.to_string()));
        }
        Ok(WriteStream::buffer())
    }

    fn close_write(&mut self, name: &str, stream: WriteStream) -> StoreResult<()> {
        let plaintext = stream.into_buffer().ok_or_else(|| {
            StoreError::Io(std::io::Error::other(format!(
                "encrypted entry {name} was not buffered"
            )))
        })?;
        let key = self.key(name)?;
        let (ciphertext, nonce) = key.encrypt(name, &plaintext)?;
        let record = EntryRecord {
            nonce: hex::encode(nonce),
            size: plaintext.len() as u64,
            checksum: checksum(&plaintext),
        };

        let mut sink = self.inner.open_write(name)?;
        sink.write_all(&ciphertext)?;
        self.inner.close_write(name, sink)?;

        if let Some(manifest) = self.manifest.as_mut() {
            manifest.entries.insert(name.to_string(), record);
        }
        debug!(name, size = plaintext.len(), "entry encrypted");
        Ok(())
    }

    fn open_read(&mut self, name: &str) -> StoreResult<(ReadStream, u64)> {
        if self.is_plain() {
            return self.inner.open_read(name);
        }
        if name == MANIFEST_ENTRY {
            return Err(StoreError::NotFound(name.to_string()));
        }
        let record = match self.manifest.as_ref().and_then(|m| m.record(name)) {
            Some(record) => record.clone(),
            None => return self.inner.open_read(name),
        };
        let key = self.key(name)?.clone();

        let (mut stream, _) = self.inner.open_read(name)?;
        let mut ciphertext = Vec::new();
        stream.read_to_end(&mut ciphertext)?;
        self.inner.close_read(name, stream)?;

        let nonce = record.nonce_bytes()?;
        let plaintext = key.decrypt(name, &nonce, &ciphertext)?;
        if plaintext.len() as u64 != record.size || checksum(&plaintext) != record.checksum {
            error!(name, expected = record.size, actual = plaintext.len(), "integrity check failed");
            return Err(CryptoError::Integrity {
                name: name.to_string(),
                reason: "size or checksum does not match the manifest".into(),
            }
            .into());
        }
        let size = record.size;
        Ok((read_stream_from_bytes(plaintext), size))
    }

    fn enter_relative_directory(&mut self, dir: &str) -> bool {
        self.inner.enter_relative_directory(dir)
    }

    fn enter_absolute_directory(&mut self, path: &str) -> bool {
        self.inner.enter_absolute_directory(path)
    }

    fn file_exists(&self, name: &str) -> bool {
        name != MANIFEST_ENTRY && self.inner.file_exists(name)
    }

    fn entries(&self) -> Vec<String> {
        self.inner
            .entries()
            .into_iter()
            .filter(|name| name != MANIFEST_ENTRY)
            .collect()
    }

    fn finalize_store(&mut self) -> StoreResult<()> {
        if self.inner.mode() == OpenMode::Write {
            let manifest = self
                .manifest
                .as_ref()
                .ok_or_else(|| StoreError::from(CryptoError::PasswordRequired))?;
            let json = manifest.to_json()?;
            let mut sink = self.inner.open_write(MANIFEST_ENTRY)?;
            sink.write_all(&json)?;
            self.inner.close_write(MANIFEST_ENTRY, sink)?;
            debug!(entries = manifest.entries.len(), "encryption manifest written");
        }
        self.inner.finalize_store()
    }

    fn is_encrypted(&self) -> bool {
        !self.is_plain()
    }

    /// Write mode: accepted until the first entry is encrypted. Read mode:
    /// accepted only if the password unlocks the manifest.
    fn set_password(&mut self, password: &str) -> bool {
        match self.inner.mode() {
            OpenMode::Write => {
                let locked = self
                    .manifest
                    .as_ref()
                    .is_some_and(|m| !m.entries.is_empty());
                if locked {
                    warn!("password change refused after entries were written");
                    return false;
                }
                let key = EntryKey::derive(password, &self.salt);
                self.manifest = Some(EncryptionManifest::new(&self.salt, &key));
                self.key = Some(key);
            }
            OpenMode::Read => {
                let Some(manifest) = self.manifest.as_ref() else {
                    return false;
                };
                match manifest.unlock(password) {
                    Ok(key) => self.key = Some(key),
                    Err(err) => {
                        warn!(error = %err, "password rejected");
                        return false;
                    }
                }
            }
        }
        self.password = Some(Zeroizing::new(password.to_string()));
        true
    }

    fn password(&self) -> String {
        self.password
            .as_ref()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default()
    }

    fn take_buffer(&mut self) -> Option<Vec<u8>> {
        self.inner.take_buffer()
    }
}

impl<B: Backend> std::fmt::Debug for EncryptedBackend<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedBackend")
            .field("inner", &self.inner.name())
            .field("mode", &self.inner.mode())
            .field("has_password", &self.password.is_some())
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}
