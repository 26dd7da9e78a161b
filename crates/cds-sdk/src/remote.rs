//! Remote locations: fetched into a local temporary file before opening,
//! uploaded from one after finalize.

use std::io;
use std::path::Path;
use std::sync::Arc;

use cds_store::{Backend, ReadStream, StoreResult, WriteStream};
use cds_types::OpenMode;
use tempfile::TempPath;
use tracing::{debug, error};
use url::Url;

/// Moves whole containers between a URL and a local file.
///
/// The store never speaks a network protocol itself; callers plug in
/// whatever transfer mechanism they have.
pub trait RemoteTransport: Send + Sync {
    fn download(&self, url: &Url, dest: &Path) -> io::Result<()>;

    fn upload(&self, src: &Path, url: &Url) -> io::Result<()>;
}

/// Backend over a local temporary copy of a remote container.
///
/// The temporary file is deleted when this backend is dropped, whether or
/// not the session finished cleanly.
pub struct RemoteBackend {
    inner: Box<dyn Backend>,
    local: TempPath,
    url: Url,
    upload: Option<Arc<dyn RemoteTransport>>,
}

impl RemoteBackend {
    /// Read-mode wrapper: `local` already holds the downloaded container.
    pub fn for_read(inner: Box<dyn Backend>, local: TempPath, url: Url) -> Self {
        Self {
            inner,
            local,
            url,
            upload: None,
        }
    }

    /// Write-mode wrapper: `inner` writes to `local`, which is uploaded to
    /// `url` once the container is finalized.
    pub fn for_write(
        inner: Box<dyn Backend>,
        local: TempPath,
        url: Url,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        Self {
            inner,
            local,
            url,
            upload: Some(transport),
        }
    }
}

impl Backend for RemoteBackend {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn mode(&self) -> OpenMode {
        self.inner.mode()
    }

    fn open_write(&mut self, name: &str) -> StoreResult<WriteStream> {
        self.inner.open_write(name)
    }

    fn close_write(&mut self, name: &str, stream: WriteStream) -> StoreResult<()> {
        self.inner.close_write(name, stream)
    }

    fn open_read(&mut self, name: &str) -> StoreResult<(ReadStream, u64)> {
        self.inner.open_read(name)
    }

    fn close_read(&mut self, name: &str, stream: ReadStream) -> StoreResult<()> {
        self.inner.close_read(name, stream)
    }

    fn enter_relative_directory(&mut self, dir: &str) -> bool {
        self.inner.enter_relative_directory(dir)
    }

    fn enter_absolute_directory(&mut self, path: &str) -> bool {
        self.inner.enter_absolute_directory(path)
    }

    fn file_exists(&self, name: &str) -> bool {
        self.inner.file_exists(name)
    }

    fn entries(&self) -> Vec<String> {
        self.inner.entries()
    }

    fn finalize_store(&mut self) -> StoreResult<()> {
        self.inner.finalize_store()?;
        if let Some(transport) = &self.upload {
            if let Err(err) = transport.upload(&self.local, &self.url) {
                error!(url = %self.url, error = %err, "upload failed");
                return Err(err.into());
            }
            debug!(url = %self.url, "container uploaded");
        }
        Ok(())
    }

    fn is_encrypted(&self) -> bool {
        self.inner.is_encrypted()
    }

    fn set_password(&mut self, password: &str) -> bool {
        self.inner.set_password(password)
    }

    fn password(&self) -> String {
        self.inner.password()
    }
}
