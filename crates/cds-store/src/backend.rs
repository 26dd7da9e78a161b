use cds_types::OpenMode;

use crate::error::StoreResult;
use crate::stream::{ReadStream, WriteStream};

/// Physical storage medium behind a [`StoreSession`](crate::StoreSession).
///
/// Every name a backend receives is already external: fully expanded and
/// relative to the container root. Backends never see logical names.
///
/// Implementations must satisfy:
/// - `open_read` fails with `NotFound` for a missing entry.
/// - Archive backends reject a second `open_write` of the same name with
///   `DuplicateEntry`. The directory backend overwrites.
/// - `enter_absolute_directory` succeeds for any path entered before.
/// - `finalize_store` seals the container; nothing is guaranteed on disk
///   before it returns.
pub trait Backend: Send {
    /// Short name used in logs (`"zip"`, `"tar"`, `"directory"`, ...).
    fn name(&self) -> &'static str;

    /// Mode the backend was opened in.
    fn mode(&self) -> OpenMode;

    /// Begin writing the entry `name`.
    fn open_write(&mut self, name: &str) -> StoreResult<WriteStream>;

    /// Commit the entry written through `stream`.
    fn close_write(&mut self, name: &str, stream: WriteStream) -> StoreResult<()>;

    /// Open the entry `name` for reading and report its size in bytes.
    fn open_read(&mut self, name: &str) -> StoreResult<(ReadStream, u64)>;

    /// Release a read stream.
    fn close_read(&mut self, _name: &str, stream: ReadStream) -> StoreResult<()> {
        drop(stream);
        Ok(())
    }

    /// Descend into `dir` relative to the backend's current directory.
    ///
    /// Read mode verifies the directory exists. Write mode may create it.
    fn enter_relative_directory(&mut self, dir: &str) -> bool;

    /// Jump to `path` (relative to the container root, `""` is the root).
    fn enter_absolute_directory(&mut self, path: &str) -> bool;

    /// Whether the entry `name` exists.
    fn file_exists(&self, name: &str) -> bool;

    /// External names of all entries, sorted.
    fn entries(&self) -> Vec<String>;

    /// Flush and seal the physical container.
    fn finalize_store(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn is_encrypted(&self) -> bool {
        false
    }

    /// Supply the password for an encrypted container. Unencrypted
    /// backends always refuse.
    fn set_password(&mut self, _password: &str) -> bool {
        false
    }

    fn password(&self) -> String {
        String::new()
    }

    /// Hand out the finished bytes of an in-memory container.
    fn take_buffer(&mut self) -> Option<Vec<u8>> {
        None
    }
}

/// Backend-side current directory for archives, where directories only exist
/// implicitly as prefixes of entry names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryCursor {
    current: String,
}

impl DirectoryCursor {
    /// The current directory, `""` or ending in `/`.
    pub fn current(&self) -> &str {
        &self.current
    }

    /// Descend into `dir`. In Read mode `dir_exists` is asked about the
    /// candidate prefix (ending in `/`); Write mode always succeeds.
    pub fn enter_relative<F>(&mut self, dir: &str, mode: OpenMode, dir_exists: F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        let dir = dir.trim_matches('/');
        if dir.is_empty() {
            return true;
        }
        let candidate = format!("{}{dir}/", self.current);
        self.move_to(candidate, mode, dir_exists)
    }

    /// Jump to `path` from the root.
    pub fn enter_absolute<F>(&mut self, path: &str, mode: OpenMode, dir_exists: F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        let path = path.trim_matches('/');
        if path.is_empty() {
            self.current.clear();
            return true;
        }
        self.move_to(format!("{path}/"), mode, dir_exists)
    }

    fn move_to<F>(&mut self, candidate: String, mode: OpenMode, dir_exists: F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        if mode == OpenMode::Write || dir_exists(&candidate) {
            self.current = candidate;
            true
        } else {
            false
        }
    }
}

/// Whether any of `names` lives under the directory `prefix` (ending in `/`).
pub fn prefix_exists<'a, I>(mut names: I, prefix: &str) -> bool
where
    I: Iterator<Item = &'a str>,
{
    names.any(|name| name.starts_with(prefix))
}
