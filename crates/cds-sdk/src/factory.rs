//! Backend selection and session construction.
//!
//! `Auto` resolves as follows:
//!
//! - Write mode: the configured default format.
//! - Read mode on a directory: the directory backend.
//! - Read mode otherwise: sniff the first four bytes. gzip selects TAR and a
//!   ZIP local header selects ZIP. A short or unknown prefix selects the
//!   configured default format.
//! - ZIP in Read mode goes through the encrypted backend when
//!   `encrypted_fallback` is set. That backend serves containers without an
//!   encryption manifest as plain ZIP, so no retry is ever needed.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cds_archive::{determine_backend, ArchiveSource, ArchiveTarget, TarBackend, ZipBackend};
use cds_store::{Backend, DirectoryBackend, StoreError, StoreSession};
use cds_types::{BackendKind, OpenMode};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{SdkError, SdkResult};
use crate::location::StoreLocation;
use crate::remote::{RemoteBackend, RemoteTransport};

/// Physical medium a backend is built over.
enum Medium {
    File(PathBuf),
    Memory(Vec<u8>),
}

/// Builds store sessions from a location, a mode, and a backend choice.
#[derive(Clone, Default)]
pub struct StoreFactory {
    config: StoreConfig,
    transport: Option<Arc<dyn RemoteTransport>>,
}

impl StoreFactory {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            transport: None,
        }
    }

    /// Enable remote locations through `transport`.
    pub fn with_transport(mut self, transport: Arc<dyn RemoteTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Open or create the store at a local `path`.
    ///
    /// An empty `app_identification` falls back to the configured tag.
    pub fn create_store(
        &self,
        path: &Path,
        mode: OpenMode,
        app_identification: &[u8],
        kind: BackendKind,
    ) -> SdkResult<StoreSession> {
        let kind = self.resolve_for_path(path, mode, kind)?;
        let backend = self.build(kind, Medium::File(path.to_path_buf()), mode, app_identification)?;
        info!(path = %path.display(), %mode, backend = %kind, "store opened");
        Ok(self.session(backend))
    }

    /// Open or create the store at `location`, local or remote.
    pub fn create_store_at(
        &self,
        location: &StoreLocation,
        mode: OpenMode,
        app_identification: &[u8],
        kind: BackendKind,
    ) -> SdkResult<StoreSession> {
        let url = match location {
            StoreLocation::Local(path) => {
                return self.create_store(path, mode, app_identification, kind)
            }
            StoreLocation::Remote(url) => url.clone(),
        };
        if kind == BackendKind::Directory {
            return Err(unsupported(kind, "directories cannot be remote"));
        }
        let transport = self
            .transport
            .clone()
            .ok_or_else(|| SdkError::NoTransport(url.to_string()))?;
        let local = tempfile::Builder::new()
            .prefix(".cds-remote-")
            .tempfile()?
            .into_temp_path();

        let backend: Box<dyn Backend> = match mode {
            OpenMode::Read => {
                transport
                    .download(&url, &local)
                    .map_err(|source| SdkError::Transport {
                        url: url.to_string(),
                        source,
                    })?;
                debug!(%url, local = %local.display(), "container downloaded");
                let kind = self.resolve_for_path(&local, mode, kind)?;
                let inner = self.build(kind, Medium::File(local.to_path_buf()), mode, app_identification)?;
                Box::new(RemoteBackend::for_read(inner, local, url))
            }
            OpenMode::Write => {
                let kind = self.resolve_for_write(kind);
                let inner = self.build(kind, Medium::File(local.to_path_buf()), mode, app_identification)?;
                Box::new(RemoteBackend::for_write(inner, local, url, transport))
            }
        };
        Ok(self.session(backend))
    }

    /// Start writing a container into memory. After `finalize`, the bytes
    /// come from [`StoreSession::take_buffer`].
    pub fn create_in_memory(&self, app_identification: &[u8], kind: BackendKind) -> SdkResult<StoreSession> {
        let kind = self.resolve_for_write(kind);
        let backend = self.build(kind, Medium::Memory(Vec::new()), OpenMode::Write, app_identification)?;
        Ok(self.session(backend))
    }

    /// Read a container held in memory.
    pub fn open_buffer(&self, bytes: Vec<u8>, kind: BackendKind) -> SdkResult<StoreSession> {
        let kind = match kind {
            BackendKind::Auto => {
                let detected = determine_backend(&mut bytes.as_slice(), self.config.default_format);
                self.read_fallback(detected)
            }
            kind => kind,
        };
        let backend = self.build(kind, Medium::Memory(bytes), OpenMode::Read, &[])?;
        Ok(self.session(backend))
    }

    fn session(&self, backend: Box<dyn Backend>) -> StoreSession {
        StoreSession::with_limits(backend, self.config.session_limits())
    }

    fn resolve_for_path(&self, path: &Path, mode: OpenMode, kind: BackendKind) -> SdkResult<BackendKind> {
        if kind != BackendKind::Auto {
            return Ok(kind);
        }
        if mode == OpenMode::Write {
            return Ok(self.resolve_for_write(kind));
        }
        if path.is_dir() {
            debug!(path = %path.display(), "auto-selected directory backend");
            return Ok(BackendKind::Directory);
        }
        let mut file = File::open(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => {
                SdkError::Store(StoreError::NotFound(path.display().to_string()))
            }
            _ => SdkError::Io(err),
        })?;
        let detected = determine_backend(&mut file, self.config.default_format);
        Ok(self.read_fallback(detected))
    }

    fn resolve_for_write(&self, kind: BackendKind) -> BackendKind {
        if kind != BackendKind::Auto {
            return kind;
        }
        debug!(backend = %self.config.default_format, "auto-selected default format");
        self.config.default_format
    }

    /// Route a sniffed ZIP through the encrypted backend when enabled.
    fn read_fallback(&self, detected: BackendKind) -> BackendKind {
        let resolved = if detected == BackendKind::Zip
            && self.config.encrypted_fallback
            && cfg!(feature = "encryption")
        {
            BackendKind::Encrypted
        } else {
            detected
        };
        debug!(%detected, backend = %resolved, "auto-selected backend");
        resolved
    }

    fn build(
        &self,
        kind: BackendKind,
        medium: Medium,
        mode: OpenMode,
        app_identification: &[u8],
    ) -> SdkResult<Box<dyn Backend>> {
        let app_identification = if app_identification.is_empty() {
            self.config.app_identification.as_bytes()
        } else {
            app_identification
        };
        let backend: Box<dyn Backend> = match kind {
            BackendKind::Zip => Box::new(zip_backend(medium, mode, app_identification)?),
            BackendKind::Tar => Box::new(match mode {
                OpenMode::Write => TarBackend::create(target(medium), app_identification)?,
                OpenMode::Read => TarBackend::open(source(medium))?,
            }),
            BackendKind::Directory => match medium {
                Medium::File(path) => Box::new(DirectoryBackend::open(&path, mode)?),
                Medium::Memory(_) => {
                    return Err(unsupported(kind, "directories need a filesystem path"))
                }
            },
            BackendKind::Encrypted => encrypted_backend(medium, mode, app_identification)?,
            BackendKind::Auto => {
                return Err(unsupported(kind, "backend must be resolved before opening"))
            }
        };
        Ok(backend)
    }
}

fn target(medium: Medium) -> ArchiveTarget {
    match medium {
        Medium::File(path) => ArchiveTarget::File(path),
        Medium::Memory(_) => ArchiveTarget::Memory,
    }
}

fn source(medium: Medium) -> ArchiveSource {
    match medium {
        Medium::File(path) => ArchiveSource::File(path),
        Medium::Memory(bytes) => ArchiveSource::Memory(bytes),
    }
}

fn zip_backend(medium: Medium, mode: OpenMode, app_identification: &[u8]) -> SdkResult<ZipBackend> {
    Ok(match mode {
        OpenMode::Write => ZipBackend::create(target(medium), app_identification)?,
        OpenMode::Read => ZipBackend::open(source(medium))?,
    })
}

#[cfg(feature = "encryption")]
fn encrypted_backend(
    medium: Medium,
    mode: OpenMode,
    app_identification: &[u8],
) -> SdkResult<Box<dyn Backend>> {
    let zip = zip_backend(medium, mode, app_identification)?;
    Ok(Box::new(cds_crypto::EncryptedBackend::new(zip)?))
}

#[cfg(not(feature = "encryption"))]
fn encrypted_backend(
    _medium: Medium,
    _mode: OpenMode,
    _app_identification: &[u8],
) -> SdkResult<Box<dyn Backend>> {
    Err(unsupported(BackendKind::Encrypted, "built without the encryption feature"))
}

fn unsupported(kind: BackendKind, reason: &str) -> SdkError {
    SdkError::Store(StoreError::BackendUnsupported {
        kind,
        reason: reason.to_string(),
    })
}

/// Open or create a local store with `config`.
pub fn create_store(
    path: &Path,
    mode: OpenMode,
    app_identification: &[u8],
    kind: BackendKind,
    config: &StoreConfig,
) -> SdkResult<StoreSession> {
    StoreFactory::new(config.clone()).create_store(path, mode, app_identification, kind)
}
