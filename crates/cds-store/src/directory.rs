use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use cds_types::OpenMode;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::backend::Backend;
use crate::error::{StoreError, StoreResult};
use crate::stream::{ReadStream, WriteStream};

/// Store backed by a plain directory tree: every entry is a real file under
/// `root`.
///
/// In Write mode, entering a directory creates it on disk, and parent
/// directories of an entry are created when the entry is opened. Writing a
/// name that already exists on disk overwrites it; rejecting duplicates
/// within one session is left to the session.
#[derive(Debug)]
pub struct DirectoryBackend {
    root: PathBuf,
    mode: OpenMode,
    current: PathBuf,
}

impl DirectoryBackend {
    /// Open the directory store rooted at `root`.
    ///
    /// Read mode requires `root` to be an existing directory; Write mode
    /// creates it.
    pub fn open(root: &Path, mode: OpenMode) -> StoreResult<Self> {
        match mode {
            OpenMode::Write => fs::create_dir_all(root)?,
            OpenMode::Read => {
                if !root.is_dir() {
                    return Err(StoreError::NotFound(root.display().to_string()));
                }
            }
        }
        debug!(root = %root.display(), %mode, "directory store opened");
        Ok(Self {
            root: root.to_path_buf(),
            mode,
            current: PathBuf::new(),
        })
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn enter(&mut self, candidate: PathBuf) -> bool {
        let full = self.root.join(&candidate);
        if full.is_dir() {
            self.current = candidate;
            return true;
        }
        if self.mode == OpenMode::Write {
            match fs::create_dir_all(&full) {
                Ok(()) => {
                    self.current = candidate;
                    return true;
                }
                Err(err) => {
                    warn!(path = %full.display(), error = %err, "cannot create directory");
                }
            }
        }
        false
    }
}

impl Backend for DirectoryBackend {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn open_write(&mut self, name: &str) -> StoreResult<WriteStream> {
        let path = self.entry_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(WriteStream::file(File::create(&path)?))
    }

    fn close_write(&mut self, name: &str, stream: WriteStream) -> StoreResult<()> {
        match stream {
            WriteStream::File(mut writer) => {
                writer.flush()?;
                let file = writer.into_inner().map_err(|e| e.into_error())?;
                file.sync_all()?;
            }
            WriteStream::Buffer(_) => {
                return Err(StoreError::Io(io::Error::other(format!(
                    "directory entry {name} must be file-backed"
                ))));
            }
        }
        Ok(())
    }

    fn open_read(&mut self, name: &str) -> StoreResult<(ReadStream, u64)> {
        let file = match File::open(self.entry_path(name)) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let size = file.metadata()?.len();
        let stream: ReadStream = Box::new(BufReader::new(file));
        Ok((stream, size))
    }

    fn enter_relative_directory(&mut self, dir: &str) -> bool {
        let candidate = self.current.join(dir.trim_matches('/'));
        self.enter(candidate)
    }

    fn enter_absolute_directory(&mut self, path: &str) -> bool {
        let candidate = PathBuf::from(path.trim_matches('/'));
        self.enter(candidate)
    }

    fn file_exists(&self, name: &str) -> bool {
        self.entry_path(name).is_file()
    }

    fn entries(&self) -> Vec<String> {
        let mut names: Vec<String> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&self.root).ok()?;
                let segments: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                Some(segments.join("/"))
            })
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn write_then_read_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("doc");

        let mut backend = DirectoryBackend::open(&root, OpenMode::Write).unwrap();
        let mut stream = backend.open_write("part0/maindoc.xml").unwrap();
        stream.write_all(b"<doc/>").unwrap();
        backend.close_write("part0/maindoc.xml", stream).unwrap();
        assert!(root.join("part0/maindoc.xml").is_file());

        let mut backend = DirectoryBackend::open(&root, OpenMode::Read).unwrap();
        assert!(backend.file_exists("part0/maindoc.xml"));
        let (mut stream, size) = backend.open_read("part0/maindoc.xml").unwrap();
        assert_eq!(size, 6);
        let mut text = String::new();
        stream.read_to_string(&mut text).unwrap();
        assert_eq!(text, "<doc/>");
        assert_eq!(backend.entries(), vec!["part0/maindoc.xml"]);
    }

    #[test]
    fn read_requires_existing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirectoryBackend::open(&dir.path().join("missing"), OpenMode::Read).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn write_mode_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = DirectoryBackend::open(dir.path(), OpenMode::Write).unwrap();
        assert!(backend.enter_relative_directory("part0"));
        assert!(backend.enter_relative_directory("pictures"));
        assert!(dir.path().join("part0/pictures").is_dir());
        assert!(backend.enter_absolute_directory(""));
        assert!(backend.enter_absolute_directory("part0/"));
    }

    #[test]
    fn read_mode_checks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("part0")).unwrap();
        let mut backend = DirectoryBackend::open(dir.path(), OpenMode::Read).unwrap();
        assert!(backend.enter_relative_directory("part0"));
        assert!(!backend.enter_relative_directory("nope"));
        assert!(!dir.path().join("part0/nope").exists());
    }

    #[test]
    fn missing_entry_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = DirectoryBackend::open(dir.path(), OpenMode::Read).unwrap();
        assert!(matches!(backend.open_read("absent.xml"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn overwrite_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"old").unwrap();
        let mut backend = DirectoryBackend::open(dir.path(), OpenMode::Write).unwrap();
        let mut stream = backend.open_write("a.txt").unwrap();
        stream.write_all(b"new").unwrap();
        backend.close_write("a.txt", stream).unwrap();
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"new");
    }

    #[test]
    fn buffered_stream_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = DirectoryBackend::open(dir.path(), OpenMode::Write).unwrap();
        let err = backend.close_write("a.txt", WriteStream::buffer()).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(!dir.path().join("a.txt").exists());
    }
}
