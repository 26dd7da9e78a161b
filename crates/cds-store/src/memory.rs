use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use cds_types::OpenMode;

use crate::backend::{prefix_exists, Backend, DirectoryCursor};
use crate::error::{StoreError, StoreResult};
use crate::stream::{read_stream_from_bytes, ReadStream, WriteStream};

/// Entry map shared between in-memory backends.
pub type SharedEntries = Arc<RwLock<BTreeMap<String, Vec<u8>>>>;

/// Map-backed store for tests and embedding.
///
/// Entries become visible in the shared map when they are closed, so a Write
/// session and a later Read session can share one map. Duplicate writes are
/// rejected like in the archive backends.
pub struct MemoryBackend {
    entries: SharedEntries,
    mode: OpenMode,
    cursor: DirectoryCursor,
    open_writes: BTreeSet<String>,
}

impl MemoryBackend {
    /// Create an empty backend with its own map.
    pub fn new(mode: OpenMode) -> Self {
        Self::with_storage(SharedEntries::default(), mode)
    }

    /// Create a backend over an existing shared map.
    pub fn with_storage(entries: SharedEntries, mode: OpenMode) -> Self {
        Self {
            entries,
            mode,
            cursor: DirectoryCursor::default(),
            open_writes: BTreeSet::new(),
        }
    }

    /// Create a Read-mode backend pre-populated with `entries`.
    pub fn with_entries<I, N>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, Vec<u8>)>,
        N: Into<String>,
    {
        let map: BTreeMap<String, Vec<u8>> =
            entries.into_iter().map(|(name, data)| (name.into(), data)).collect();
        Self::with_storage(Arc::new(RwLock::new(map)), OpenMode::Read)
    }

    /// Handle to the underlying map.
    pub fn storage(&self) -> SharedEntries {
        Arc::clone(&self.entries)
    }

    fn entry_count(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn open_write(&mut self, name: &str) -> StoreResult<WriteStream> {
        let committed = self.entries.read().expect("lock poisoned").contains_key(name);
        if committed || self.open_writes.contains(name) {
            return Err(StoreError::DuplicateEntry(name.to_string()));
        }
        self.open_writes.insert(name.to_string());
        Ok(WriteStream::buffer())
    }

    fn close_write(&mut self, name: &str, stream: WriteStream) -> StoreResult<()> {
        self.open_writes.remove(name);
        let data = stream.into_buffer().unwrap_or_default();
        self.entries
            .write()
            .expect("lock poisoned")
            .insert(name.to_string(), data);
        Ok(())
    }

    fn open_read(&mut self, name: &str) -> StoreResult<(ReadStream, u64)> {
        let map = self.entries.read().expect("lock poisoned");
        let data = map
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let size = data.len() as u64;
        Ok((read_stream_from_bytes(data), size))
    }

    fn enter_relative_directory(&mut self, dir: &str) -> bool {
        let entries = Arc::clone(&self.entries);
        self.cursor.enter_relative(dir, self.mode, |prefix| {
            let map = entries.read().expect("lock poisoned");
            prefix_exists(map.keys().map(String::as_str), prefix)
        })
    }

    fn enter_absolute_directory(&mut self, path: &str) -> bool {
        let entries = Arc::clone(&self.entries);
        self.cursor.enter_absolute(path, self.mode, |prefix| {
            let map = entries.read().expect("lock poisoned");
            prefix_exists(map.keys().map(String::as_str), prefix)
        })
    }

    fn file_exists(&self, name: &str) -> bool {
        self.entries.read().expect("lock poisoned").contains_key(name)
    }

    fn entries(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("mode", &self.mode)
            .field("entry_count", &self.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn write_then_read_through_shared_map() {
        let mut writer = MemoryBackend::new(OpenMode::Write);
        let mut stream = writer.open_write("a/b.txt").unwrap();
        stream.write_all(b"payload").unwrap();
        writer.close_write("a/b.txt", stream).unwrap();

        let mut reader = MemoryBackend::with_storage(writer.storage(), OpenMode::Read);
        let (mut stream, size) = reader.open_read("a/b.txt").unwrap();
        assert_eq!(size, 7);
        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"payload");
    }

    #[test]
    fn duplicate_write_rejected() {
        let mut backend = MemoryBackend::new(OpenMode::Write);
        let stream = backend.open_write("x").unwrap();
        backend.close_write("x", stream).unwrap();
        assert!(matches!(
            backend.open_write("x"),
            Err(StoreError::DuplicateEntry(name)) if name == "x"
        ));
    }

    #[test]
    fn missing_entry_not_found() {
        let mut backend = MemoryBackend::with_entries([("present", vec![1])]);
        assert!(matches!(backend.open_read("absent"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn directories_are_name_prefixes() {
        let mut backend = MemoryBackend::with_entries([("part0/maindoc.xml", vec![])]);
        assert!(backend.enter_relative_directory("part0"));
        assert!(!backend.enter_relative_directory("part1"));
        assert!(backend.enter_absolute_directory(""));
        assert!(!backend.enter_relative_directory("maindoc.xml"));
    }
}
