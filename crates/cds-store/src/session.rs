use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use cds_types::{NamingPolicy, OpenMode, DEFAULT_MAX_NAME_LEN};
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::backend::Backend;
use crate::error::{StoreError, StoreResult};
use crate::naming::{validate_external_name, PathCodec};
use crate::stream::{ReadStream, WriteStream};

/// Default buffer size of the copy helpers.
pub const DEFAULT_COPY_CHUNK_SIZE: usize = 8 * 1024;

/// Per-session limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionLimits {
    /// Longest external name accepted by `open`.
    pub max_name_len: usize,
    /// Buffer size used by `add_local_file`, `extract_file` and friends.
    pub copy_chunk_size: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_name_len: DEFAULT_MAX_NAME_LEN,
            copy_chunk_size: DEFAULT_COPY_CHUNK_SIZE,
        }
    }
}

/// The single entry a session may have open.
enum OpenStream {
    Read {
        name: String,
        size: u64,
        source: ReadStream,
    },
    Write {
        name: String,
        size: u64,
        sink: WriteStream,
    },
}

impl OpenStream {
    fn name(&self) -> &str {
        match self {
            Self::Read { name, .. } | Self::Write { name, .. } => name,
        }
    }

    fn size(&self) -> u64 {
        match self {
            Self::Read { size, .. } | Self::Write { size, .. } => *size,
        }
    }
}

/// A compound document opened for reading or writing.
///
/// A session owns exactly one [`Backend`] for its whole life and runs the
/// entry protocol on top of it:
///
/// ```text
/// open(name) -> write(..)* / read(..)* -> close()    (any number of times)
/// finalize()                                         (exactly once, last)
/// ```
///
/// Protocol violations (`open` while open, `read` with nothing open, `read`
/// in a Write session) are caller bugs: they are logged at `error` level and
/// returned as errors, and never corrected silently. Calling `finalize`
/// twice panics.
///
/// A Write session dropped without `finalize` leaves an incomplete container;
/// the drop is logged as an error.
pub struct StoreSession {
    backend: Box<dyn Backend>,
    mode: OpenMode,
    codec: PathCodec,
    limits: SessionLimits,
    current_path: Vec<String>,
    directory_stack: Vec<String>,
    written: HashSet<String>,
    stream: Option<OpenStream>,
    finalized: bool,
}

impl StoreSession {
    /// Start a session over `backend` with the modern naming policy.
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self::with_limits(backend, SessionLimits::default())
    }

    /// Start a session with explicit limits.
    pub fn with_limits(backend: Box<dyn Backend>, limits: SessionLimits) -> Self {
        let mode = backend.mode();
        debug!(backend = backend.name(), %mode, "store session started");
        Self {
            backend,
            mode,
            codec: PathCodec::new(NamingPolicy::default(), mode),
            limits,
            current_path: Vec::new(),
            directory_stack: Vec::new(),
            written: HashSet::new(),
            stream: None,
            finalized: false,
        }
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    /// Log name of the backend in use.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// The active naming policy. May change once, see [`PathCodec`].
    pub fn naming_policy(&self) -> NamingPolicy {
        self.codec.policy()
    }

    /// Never expand names again in this session.
    pub fn disallow_name_expansion(&mut self) {
        self.codec.disallow_expansion();
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Resolve a logical name to the external name handed to the backend.
    ///
    /// In a Read session this may run the one-shot legacy layout probe and
    /// permanently switch the naming policy.
    pub fn to_external_name(&mut self, logical: &str) -> String {
        let current = self.current_path();
        let backend = &self.backend;
        self.codec
            .to_external_name(logical, &current, |name| backend.file_exists(name))
    }

    // ---- Entry protocol ----

    /// Open the entry `name` for reading or writing, depending on the mode.
    pub fn open(&mut self, name: &str) -> StoreResult<()> {
        if self.finalized {
            error!(name, "open called on a finalized store");
            return Err(StoreError::Finalized);
        }
        if let Some(open) = &self.stream {
            error!(name, open = open.name(), "open called while an entry is open");
            return Err(StoreError::AlreadyOpen(open.name().to_string()));
        }

        let external = self.to_external_name(name);
        if let Err(err) = validate_external_name(&external, self.limits.max_name_len) {
            warn!(name = %external, error = %err, "rejected entry name");
            return Err(err);
        }

        match self.mode {
            OpenMode::Write => {
                if self.written.contains(&external) {
                    warn!(name = %external, "duplicate entry name");
                    return Err(StoreError::DuplicateEntry(external));
                }
                debug!(name = %external, "opening entry for writing");
                let sink = self.backend.open_write(&external)?;
                self.written.insert(external.clone());
                self.stream = Some(OpenStream::Write {
                    name: external,
                    size: 0,
                    sink,
                });
            }
            OpenMode::Read => {
                debug!(name = %external, "opening entry for reading");
                let (source, size) = self.backend.open_read(&external)?;
                self.stream = Some(OpenStream::Read {
                    name: external,
                    size,
                    source,
                });
            }
        }
        Ok(())
    }

    /// Close the open entry and hand it back to the backend.
    pub fn close(&mut self) -> StoreResult<()> {
        let Some(stream) = self.stream.take() else {
            error!("close called with no entry open");
            return Err(StoreError::NotOpen);
        };
        match stream {
            OpenStream::Write { name, size, sink } => {
                debug!(name = %name, size, "closing written entry");
                self.backend.close_write(&name, sink)
            }
            OpenStream::Read { name, source, .. } => {
                debug!(name = %name, "closing read entry");
                self.backend.close_read(&name, source)
            }
        }
    }

    /// Append `data` to the open entry. Returns the number of bytes written,
    /// which always equals `data.len()`.
    ///
    /// # Panics
    ///
    /// Panics if the medium reports a short write.
    pub fn write(&mut self, data: &[u8]) -> StoreResult<usize> {
        let mode = self.mode;
        match self.stream.as_mut() {
            None => {
                error!("write called with no entry open");
                Err(StoreError::NotOpen)
            }
            Some(OpenStream::Read { .. }) => {
                error!("write called on a store opened for reading");
                Err(StoreError::WrongMode {
                    mode,
                    operation: "write",
                })
            }
            Some(OpenStream::Write { size, sink, .. }) => {
                if data.is_empty() {
                    return Ok(0);
                }
                let written = sink.write(data)?;
                assert_eq!(written, data.len(), "short write to store entry");
                *size += written as u64;
                Ok(written)
            }
        }
    }

    /// Read up to `buf.len()` bytes from the open entry. Returns 0 at the end.
    pub fn read(&mut self, buf: &mut [u8]) -> StoreResult<usize> {
        let source = self.read_source("read")?;
        Ok(source.read(buf)?)
    }

    /// Read up to `max` bytes from the open entry.
    pub fn read_bytes(&mut self, max: usize) -> StoreResult<Vec<u8>> {
        let source = self.read_source("read")?;
        let mut data = Vec::with_capacity(max.min(DEFAULT_COPY_CHUNK_SIZE));
        source.take(max as u64).read_to_end(&mut data)?;
        Ok(data)
    }

    /// Read the rest of the open entry.
    pub fn read_to_end(&mut self) -> StoreResult<Vec<u8>> {
        let source = self.read_source("read")?;
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Size of the open entry: total size in Read mode, bytes written so far
    /// in Write mode.
    pub fn size(&self) -> StoreResult<u64> {
        self.stream.as_ref().map(OpenStream::size).ok_or_else(|| {
            error!("size requested with no entry open");
            StoreError::NotOpen
        })
    }

    /// Reposition the open read stream.
    pub fn seek(&mut self, pos: u64) -> StoreResult<u64> {
        let source = self.read_source("seek")?;
        Ok(source.seek(SeekFrom::Start(pos))?)
    }

    /// Current position in the open read stream.
    pub fn pos(&mut self) -> StoreResult<u64> {
        let source = self.read_source("pos")?;
        Ok(source.stream_position()?)
    }

    /// Whether the open read stream is exhausted.
    pub fn at_end(&mut self) -> StoreResult<bool> {
        let size = self.size()?;
        Ok(self.pos()? >= size)
    }

    fn read_source(&mut self, operation: &'static str) -> StoreResult<&mut ReadStream> {
        let mode = self.mode;
        match self.stream.as_mut() {
            None => {
                error!(operation, "stream operation with no entry open");
                Err(StoreError::NotOpen)
            }
            Some(OpenStream::Write { .. }) => {
                error!(operation, "read operation on a store opened for writing");
                Err(StoreError::WrongMode { mode, operation })
            }
            Some(OpenStream::Read { source, .. }) => Ok(source),
        }
    }

    // ---- Directory navigation ----

    /// Enter `directory`, one `/`-separated segment at a time.
    ///
    /// Returns `false` if any segment cannot be entered. Segments entered
    /// before the failing one stay entered, so the current directory may
    /// have moved partway down.
    pub fn enter_directory(&mut self, directory: &str) -> bool {
        for segment in directory.split('/').filter(|s| !s.is_empty()) {
            if !self.enter_directory_segment(segment) {
                return false;
            }
        }
        true
    }

    fn enter_directory_segment(&mut self, segment: &str) -> bool {
        let expanded = self.codec.expand_directory(segment);
        if self.backend.enter_relative_directory(&expanded) {
            self.current_path.push(segment.to_string());
            debug!(directory = %self.current_path(), "entered directory");
            true
        } else {
            warn!(segment, expanded = %expanded, "cannot enter directory");
            false
        }
    }

    /// Go up one level. Returns `false` at the root.
    pub fn leave_directory(&mut self) -> bool {
        if self.current_path.pop().is_none() {
            return false;
        }
        let directory = self.current_directory();
        self.backend.enter_absolute_directory(&directory)
    }

    /// Current directory in logical form: raw segments, each followed by `/`.
    pub fn current_path(&self) -> String {
        self.current_path
            .iter()
            .map(|segment| format!("{segment}/"))
            .collect()
    }

    /// Current directory in expanded (on-disk) form.
    pub fn current_directory(&self) -> String {
        self.codec.expand_directory(&self.current_path())
    }

    /// Save the current directory.
    pub fn push_directory(&mut self) {
        self.directory_stack.push(self.current_path());
    }

    /// Return to the last saved directory. No-op if nothing was saved.
    ///
    /// Returns `false` if the saved directory could not be re-entered. The
    /// current directory is left unchanged when even the root is refused.
    pub fn pop_directory(&mut self) -> bool {
        let Some(saved) = self.directory_stack.pop() else {
            return true;
        };
        if !self.backend.enter_absolute_directory("") {
            warn!(directory = %saved, "backend refused the root; saved directory not restored");
            return false;
        }
        self.current_path.clear();
        if !self.enter_directory(&saved) {
            warn!(directory = %saved, "could not restore saved directory");
            return false;
        }
        true
    }

    /// Whether the entry `name` exists, resolved exactly like `open`.
    pub fn has_file(&mut self, name: &str) -> bool {
        let external = self.to_external_name(name);
        self.backend.file_exists(&external)
    }

    /// External names of every entry in the container.
    pub fn entries(&self) -> Vec<String> {
        self.backend.entries()
    }

    // ---- Copy helpers ----

    /// Store the file at `source` as the entry `dest`.
    ///
    /// # Panics
    ///
    /// Panics if the number of bytes copied differs from the file's size.
    pub fn add_local_file(&mut self, source: &Path, dest: &str) -> StoreResult<()> {
        let expected = fs::metadata(source)?.len();
        let mut file = File::open(source)?;
        self.open(dest)?;
        let copied = self.copy_into_entry(&mut file);
        let closed = self.close();
        let total = copied?;
        closed?;
        assert_eq!(total, expected, "copied size differs from source file size");
        Ok(())
    }

    /// Store `data` as the entry `dest`.
    pub fn add_data_to_file(&mut self, data: &[u8], dest: &str) -> StoreResult<()> {
        self.open(dest)?;
        let mut reader = data;
        let copied = self.copy_into_entry(&mut reader);
        let closed = self.close();
        copied?;
        closed
    }

    /// Recursively store every regular file under `dir`, naming entries
    /// `dest/<relative path>` (or just the relative path when `dest` is
    /// empty). Returns the logical names added. A missing `dir` adds nothing.
    pub fn add_local_directory(&mut self, dir: &Path, dest: &str) -> StoreResult<Vec<String>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut added = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| io::Error::other(e.to_string()))?;
            let relative: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let relative = relative.join("/");
            let name = if dest.is_empty() {
                relative
            } else {
                format!("{}/{relative}", dest.trim_end_matches('/'))
            };
            self.add_local_file(entry.path(), &name)?;
            added.push(name);
        }
        Ok(added)
    }

    /// Stream the entry `source` into `sink`. Returns the number of bytes
    /// copied.
    ///
    /// # Panics
    ///
    /// Panics if the number of bytes copied differs from the entry size the
    /// backend reported.
    pub fn extract_file<W: Write>(&mut self, source: &str, sink: &mut W) -> StoreResult<u64> {
        self.open(source)?;
        let expected = self.size()?;
        let copied = self.copy_out_of_entry(sink);
        let closed = self.close();
        let total = copied?;
        closed?;
        assert_eq!(total, expected, "extracted size differs from entry size");
        Ok(total)
    }

    /// Extract the entry `source` into a new file at `dest`.
    pub fn extract_file_to_path(&mut self, source: &str, dest: &Path) -> StoreResult<u64> {
        let mut file = File::create(dest)?;
        let total = self.extract_file(source, &mut file)?;
        file.sync_all()?;
        Ok(total)
    }

    /// Extract the entry `source` into memory.
    pub fn extract_to_vec(&mut self, source: &str) -> StoreResult<Vec<u8>> {
        let mut data = Vec::new();
        self.extract_file(source, &mut data)?;
        Ok(data)
    }

    fn copy_into_entry<R: Read>(&mut self, reader: &mut R) -> StoreResult<u64> {
        let mut buf = vec![0u8; self.limits.copy_chunk_size];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.write(&buf[..n])?;
            total += n as u64;
        }
        Ok(total)
    }

    fn copy_out_of_entry<W: Write>(&mut self, sink: &mut W) -> StoreResult<u64> {
        let mut buf = vec![0u8; self.limits.copy_chunk_size];
        let mut total = 0u64;
        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n])?;
            total += n as u64;
        }
        sink.flush()?;
        Ok(total)
    }

    // ---- Sealing and encryption ----

    /// Seal the container. Must be called exactly once, after the last entry
    /// has been closed.
    ///
    /// # Panics
    ///
    /// Panics when called a second time.
    pub fn finalize(&mut self) -> StoreResult<()> {
        assert!(!self.finalized, "{}", StoreError::DoubleFinalize);
        if let Some(open) = &self.stream {
            error!(open = open.name(), "finalize called while an entry is open");
            return Err(StoreError::AlreadyOpen(open.name().to_string()));
        }
        self.finalized = true;
        debug!(backend = self.backend.name(), entries = self.written.len(), "finalizing store");
        self.backend.finalize_store()
    }

    pub fn is_encrypted(&self) -> bool {
        self.backend.is_encrypted()
    }

    /// Supply the password of an encrypted container. Returns `false` for
    /// backends without encryption.
    pub fn set_password(&mut self, password: &str) -> bool {
        self.backend.set_password(password)
    }

    /// The password in use; empty for backends without encryption.
    pub fn password(&self) -> String {
        self.backend.password()
    }

    /// After `finalize`, take the bytes of an in-memory container.
    pub fn take_buffer(&mut self) -> Option<Vec<u8>> {
        if !self.finalized {
            warn!("buffer requested before finalize");
            return None;
        }
        self.backend.take_buffer()
    }
}

impl Drop for StoreSession {
    fn drop(&mut self) {
        if let Some(open) = &self.stream {
            error!(name = open.name(), "store dropped with an entry still open");
        }
        if self.mode == OpenMode::Write && !self.finalized {
            error!(
                backend = self.backend.name(),
                "write store dropped without finalize; container is incomplete"
            );
        }
    }
}

impl std::fmt::Debug for StoreSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSession")
            .field("backend", &self.backend.name())
            .field("mode", &self.mode)
            .field("policy", &self.codec.policy())
            .field("current_path", &self.current_path())
            .field("open", &self.stream.as_ref().map(OpenStream::name))
            .field("finalized", &self.finalized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBackend, SharedEntries};
    use proptest::prelude::*;

    fn write_session(storage: &SharedEntries) -> StoreSession {
        StoreSession::new(Box::new(MemoryBackend::with_storage(
            storage.clone(),
            OpenMode::Write,
        )))
    }

    fn read_session(storage: &SharedEntries) -> StoreSession {
        StoreSession::new(Box::new(MemoryBackend::with_storage(
            storage.clone(),
            OpenMode::Read,
        )))
    }

    fn keys(storage: &SharedEntries) -> Vec<String> {
        storage.read().unwrap().keys().cloned().collect()
    }

    #[test]
    fn write_read_roundtrip() {
        let storage = SharedEntries::default();
        let mut store = write_session(&storage);
        store.open("root").unwrap();
        assert_eq!(store.write(b"<doc/>").unwrap(), 6);
        assert_eq!(store.size().unwrap(), 6);
        store.close().unwrap();
        store.add_data_to_file(b"png", "pictures/p0.png").unwrap();
        store.finalize().unwrap();

        assert_eq!(keys(&storage), vec!["maindoc.xml", "pictures/p0.png"]);

        let mut store = read_session(&storage);
        assert_eq!(store.extract_to_vec("root").unwrap(), b"<doc/>");
        assert_eq!(store.extract_to_vec("pictures/p0.png").unwrap(), b"png");
    }

    #[test]
    fn numbered_parts_use_modern_layout() {
        let storage = SharedEntries::default();
        let mut store = write_session(&storage);
        assert!(store.enter_directory("0"));
        store.add_data_to_file(b"main", "root").unwrap();
        store.add_data_to_file(b"sub", "1").unwrap();
        store.finalize().unwrap();
        assert_eq!(keys(&storage), vec!["part0/maindoc.xml", "part0/part1/maindoc.xml"]);
    }

    #[test]
    fn open_while_open_is_rejected() {
        let mut store = StoreSession::new(Box::new(MemoryBackend::new(OpenMode::Write)));
        store.open("a").unwrap();
        let err = store.open("b").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyOpen(ref name) if name == "a"));
        assert!(err.is_protocol_violation());
        store.close().unwrap();
        store.finalize().unwrap();
    }

    #[test]
    fn stream_ops_require_open_entry() {
        let mut store = StoreSession::new(Box::new(MemoryBackend::new(OpenMode::Write)));
        assert!(matches!(store.write(b"x"), Err(StoreError::NotOpen)));
        assert!(matches!(store.close(), Err(StoreError::NotOpen)));
        assert!(matches!(store.size(), Err(StoreError::NotOpen)));
        store.finalize().unwrap();
    }

    #[test]
    fn wrong_mode_is_reported() {
        let mut store = StoreSession::new(Box::new(MemoryBackend::new(OpenMode::Write)));
        store.open("a").unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(
            store.read(&mut buf),
            Err(StoreError::WrongMode { mode: OpenMode::Write, operation: "read" })
        ));
        store.close().unwrap();
        store.finalize().unwrap();

        let mut store = StoreSession::new(Box::new(MemoryBackend::with_entries([("a", vec![1])])));
        store.open("a").unwrap();
        assert!(matches!(store.write(b"x"), Err(StoreError::WrongMode { .. })));
    }

    #[test]
    fn duplicate_write_rejected() {
        let mut store = StoreSession::new(Box::new(MemoryBackend::new(OpenMode::Write)));
        store.add_data_to_file(b"one", "content.xml").unwrap();
        let err = store.open("content.xml").unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEntry(ref name) if name == "content.xml"));
        assert!(!store.is_open());
        store.finalize().unwrap();
    }

    #[test]
    fn missing_entry_is_recoverable() {
        let mut store = StoreSession::new(Box::new(MemoryBackend::with_entries([("a", vec![])])));
        assert!(matches!(store.open("b"), Err(StoreError::NotFound(_))));
        assert!(!store.is_open());
        store.open("a").unwrap();
        store.close().unwrap();
    }

    #[test]
    fn name_length_ceiling() {
        let mut store = StoreSession::new(Box::new(MemoryBackend::new(OpenMode::Write)));
        let exact = "n".repeat(512);
        store.open(&exact).unwrap();
        store.close().unwrap();
        let over = "n".repeat(513);
        assert!(matches!(store.open(&over), Err(StoreError::PathTooLong { .. })));
        store.finalize().unwrap();
    }

    #[test]
    #[should_panic(expected = "store finalized twice")]
    fn double_finalize_panics() {
        let mut store = StoreSession::new(Box::new(MemoryBackend::new(OpenMode::Write)));
        store.finalize().unwrap();
        let _ = store.finalize();
    }

    #[test]
    fn finalize_with_open_entry_fails() {
        let mut store = StoreSession::new(Box::new(MemoryBackend::new(OpenMode::Write)));
        store.open("a").unwrap();
        assert!(matches!(store.finalize(), Err(StoreError::AlreadyOpen(_))));
        store.close().unwrap();
        store.finalize().unwrap();
        assert!(matches!(store.open("b"), Err(StoreError::Finalized)));
    }

    #[test]
    fn legacy_layout_autodetected_once() {
        let backend = MemoryBackend::with_entries([
            ("part0.xml", b"zero".to_vec()),
            ("part1.xml", b"one".to_vec()),
        ]);
        let mut store = StoreSession::new(Box::new(backend));
        assert_eq!(store.naming_policy(), NamingPolicy::Legacy2);
        assert_eq!(store.to_external_name("tar:/0"), "part0.xml");
        assert_eq!(store.naming_policy(), NamingPolicy::Legacy1);
        assert_eq!(store.to_external_name("tar:/1"), "part1.xml");
        assert_eq!(store.extract_to_vec("tar:/1").unwrap(), b"one");
    }

    #[test]
    fn modern_layout_keeps_policy() {
        let backend = MemoryBackend::with_entries([("part0/maindoc.xml", b"m".to_vec())]);
        let mut store = StoreSession::new(Box::new(backend));
        assert!(store.has_file("tar:/0"));
        assert_eq!(store.naming_policy(), NamingPolicy::Legacy2);
    }

    #[test]
    fn raw_policy_roundtrip() {
        let storage = SharedEntries::default();
        let mut store = write_session(&storage);
        store.disallow_name_expansion();
        store.add_data_to_file(b"raw", "tar:/0/1").unwrap();
        store.finalize().unwrap();
        assert_eq!(keys(&storage), vec!["0/1"]);

        let mut store = read_session(&storage);
        store.disallow_name_expansion();
        assert_eq!(store.extract_to_vec("0/1").unwrap(), b"raw");
    }

    #[test]
    fn legacy1_roundtrip() {
        let storage = SharedEntries::default();
        storage
            .write()
            .unwrap()
            .insert("part9.xml".into(), b"seed".to_vec());
        let mut store = read_session(&storage);
        assert!(store.has_file("tar:/9"));
        assert_eq!(store.naming_policy(), NamingPolicy::Legacy1);
        assert_eq!(store.extract_to_vec("tar:/9").unwrap(), b"seed");
    }

    #[test]
    fn enter_and_leave_directories() {
        let backend = MemoryBackend::with_entries([
            ("part0/part1/maindoc.xml", vec![]),
            ("part0/pictures/a.png", vec![]),
        ]);
        let mut store = StoreSession::new(Box::new(backend));
        assert!(store.enter_directory("0/1"));
        assert_eq!(store.current_path(), "0/1/");
        assert_eq!(store.current_directory(), "part0/part1/");
        assert!(store.leave_directory());
        assert_eq!(store.current_path(), "0/");
        assert!(store.enter_directory("pictures"));
        assert!(store.has_file("a.png"));
        assert!(store.leave_directory());
        assert!(store.leave_directory());
        assert!(!store.leave_directory());
        assert_eq!(store.current_path(), "");
    }

    #[test]
    fn partial_descent_is_kept() {
        let backend = MemoryBackend::with_entries([("part0/maindoc.xml", vec![])]);
        let mut store = StoreSession::new(Box::new(backend));
        assert!(!store.enter_directory("0/missing/deeper"));
        assert_eq!(store.current_path(), "0/");
    }

    #[test]
    fn push_pop_restores_directory() {
        let backend = MemoryBackend::with_entries([
            ("part0/maindoc.xml", vec![]),
            ("part0/x/y.bin", vec![]),
        ]);
        let mut store = StoreSession::new(Box::new(backend));
        assert!(store.enter_directory("0"));
        store.push_directory();
        assert!(store.enter_directory("x"));
        assert_eq!(store.current_path(), "0/x/");
        assert!(store.pop_directory());
        assert_eq!(store.current_path(), "0/");
        assert!(store.has_file("root"));
    }

    /// Memory backend that refuses every absolute jump.
    struct NoJumpBackend(MemoryBackend);

    impl Backend for NoJumpBackend {
        fn name(&self) -> &'static str {
            "no-jump"
        }

        fn mode(&self) -> OpenMode {
            self.0.mode()
        }

        fn open_write(&mut self, name: &str) -> StoreResult<WriteStream> {
            self.0.open_write(name)
        }

        fn close_write(&mut self, name: &str, stream: WriteStream) -> StoreResult<()> {
            self.0.close_write(name, stream)
        }

        fn open_read(&mut self, name: &str) -> StoreResult<(ReadStream, u64)> {
            self.0.open_read(name)
        }

        fn enter_relative_directory(&mut self, dir: &str) -> bool {
            self.0.enter_relative_directory(dir)
        }

        fn enter_absolute_directory(&mut self, _path: &str) -> bool {
            false
        }

        fn file_exists(&self, name: &str) -> bool {
            self.0.file_exists(name)
        }

        fn entries(&self) -> Vec<String> {
            self.0.entries()
        }
    }

    #[test]
    fn pop_reports_refused_root() {
        let backend = MemoryBackend::with_entries([("part0/x/y.bin", vec![])]);
        let mut store = StoreSession::new(Box::new(NoJumpBackend(backend)));
        store.push_directory();
        assert!(store.enter_directory("0/x"));
        assert!(!store.pop_directory());
        assert_eq!(store.current_path(), "0/x/");
    }

    #[test]
    fn pop_on_empty_stack_is_noop() {
        let backend = MemoryBackend::with_entries([("part0/maindoc.xml", vec![])]);
        let mut store = StoreSession::new(Box::new(backend));
        assert!(store.enter_directory("0"));
        assert!(store.pop_directory());
        assert_eq!(store.current_path(), "0/");
    }

    #[test]
    fn seek_pos_and_at_end() {
        let mut store =
            StoreSession::new(Box::new(MemoryBackend::with_entries([("a", b"0123456789".to_vec())])));
        store.open("a").unwrap();
        assert_eq!(store.size().unwrap(), 10);
        assert_eq!(store.read_bytes(4).unwrap(), b"0123");
        assert_eq!(store.pos().unwrap(), 4);
        store.seek(8).unwrap();
        assert!(!store.at_end().unwrap());
        assert_eq!(store.read_to_end().unwrap(), b"89");
        assert!(store.at_end().unwrap());
        store.close().unwrap();
    }

    #[test]
    fn local_file_and_directory_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("a.txt"), vec![b'a'; 20_000]).unwrap();
        std::fs::write(src.join("nested/b.txt"), b"bee").unwrap();

        let storage = SharedEntries::default();
        let mut store = write_session(&storage);
        let added = store.add_local_directory(&src, "files").unwrap();
        assert_eq!(added, vec!["files/a.txt", "files/nested/b.txt"]);
        assert!(store.add_local_directory(&dir.path().join("absent"), "x").unwrap().is_empty());
        store.finalize().unwrap();

        let mut store = read_session(&storage);
        let out = dir.path().join("a.out");
        assert_eq!(store.extract_file_to_path("files/a.txt", &out).unwrap(), 20_000);
        assert_eq!(std::fs::read(out).unwrap(), vec![b'a'; 20_000]);
        assert_eq!(store.extract_to_vec("files/nested/b.txt").unwrap(), b"bee");
    }

    #[test]
    fn add_local_file_missing_source_leaves_store_closed() {
        let mut store = StoreSession::new(Box::new(MemoryBackend::new(OpenMode::Write)));
        let err = store
            .add_local_file(Path::new("/definitely/not/here"), "x")
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(!store.is_open());
        store.finalize().unwrap();
    }

    #[test]
    fn password_is_refused_without_encryption() {
        let mut store = StoreSession::new(Box::new(MemoryBackend::new(OpenMode::Write)));
        assert!(!store.is_encrypted());
        assert!(!store.set_password("secret"));
        assert_eq!(store.password(), "");
        store.finalize().unwrap();
        assert!(store.take_buffer().is_none());
    }

    proptest! {
        #[test]
        fn directory_stack_symmetry(segments in proptest::collection::vec("[0-9a-c]{1,3}", 1..5)) {
            let storage = SharedEntries::default();
            let mut store = write_session(&storage);
            let before = store.current_path();
            for segment in &segments {
                prop_assert!(store.enter_directory(segment));
            }
            for _ in &segments {
                prop_assert!(store.leave_directory());
            }
            prop_assert_eq!(store.current_path(), before);
            store.finalize().unwrap();
        }

        #[test]
        fn roundtrip_any_payload(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let storage = SharedEntries::default();
            let mut store = write_session(&storage);
            store.add_data_to_file(&data, "tar:/0").unwrap();
            store.finalize().unwrap();
            let mut store = read_session(&storage);
            prop_assert_eq!(store.extract_to_vec("tar:/0").unwrap(), data);
        }
    }
}
