use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

use cds_store::{
    prefix_exists, read_stream_from_bytes, Backend, DirectoryCursor, ReadStream, StoreError,
    StoreResult, WriteStream,
};
use cds_types::OpenMode;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use tar::{Archive, Builder, EntryType, Header};
use tracing::{debug, warn};

use crate::error::ArchiveError;
use crate::magic::GZIP_MAGIC;
use crate::medium::{entry_buffer, ArchiveSource, ArchiveTarget, Sink};

enum TarState {
    Reading {
        files: BTreeMap<String, Vec<u8>>,
        dirs: BTreeSet<String>,
        app_identification: Option<Vec<u8>>,
    },
    Writing {
        builder: Option<Builder<GzEncoder<Sink>>>,
        target: ArchiveTarget,
        written: BTreeSet<String>,
    },
}

/// gzip-compressed TAR backend.
///
/// The application tag travels in the gzip header's file name field. Reading
/// loads the whole archive up front; plain uncompressed TAR is accepted too.
pub struct TarBackend {
    state: TarState,
    cursor: DirectoryCursor,
    finished: Option<Vec<u8>>,
}

impl TarBackend {
    pub fn create(target: ArchiveTarget, app_identification: &[u8]) -> StoreResult<Self> {
        if app_identification.contains(&0) {
            return Err(ArchiveError::InvalidFormat {
                format: "gzip",
                reason: "application tag contains a NUL byte".into(),
            }
            .into());
        }
        let sink = Sink::create(&target)?;
        let mut gz = GzBuilder::new();
        if !app_identification.is_empty() {
            gz = gz.filename(app_identification);
        }
        let encoder = gz.write(sink, Compression::default());
        let builder = Builder::new(encoder);
        debug!(?target, "tar store created");
        Ok(Self {
            state: TarState::Writing {
                builder: Some(builder),
                target,
                written: BTreeSet::new(),
            },
            cursor: DirectoryCursor::default(),
            finished: None,
        })
    }

    pub fn open(source: ArchiveSource) -> StoreResult<Self> {
        let raw = source.into_bytes()?;
        let (payload, app_identification) = if raw.starts_with(&GZIP_MAGIC) {
            let mut decoder = GzDecoder::new(raw.as_slice());
            let mut payload = Vec::new();
            decoder.read_to_end(&mut payload).map_err(corrupt)?;
            let tag = decoder
                .header()
                .and_then(|h| h.filename())
                .map(<[u8]>::to_vec);
            (payload, tag)
        } else {
            (raw, None)
        };

        let mut files = BTreeMap::new();
        let mut dirs = BTreeSet::new();
        let mut archive = Archive::new(payload.as_slice());
        for entry in archive.entries().map_err(corrupt)? {
            let mut entry = entry.map_err(corrupt)?;
            let name = normalize_member_name(&entry.path().map_err(corrupt)?.to_string_lossy());
            if name.is_empty() {
                continue;
            }
            let kind = entry.header().entry_type();
            if kind.is_dir() {
                dirs.insert(format!("{}/", name.trim_end_matches('/')));
            } else if kind.is_file() {
                let mut data = entry_buffer(entry.size());
                entry.read_to_end(&mut data).map_err(corrupt)?;
                files.insert(name, data);
            } else {
                debug!(name = %name, ?kind, "skipping non-file tar member");
            }
        }
        debug!(entries = files.len(), "tar store opened");
        Ok(Self {
            state: TarState::Reading {
                files,
                dirs,
                app_identification,
            },
            cursor: DirectoryCursor::default(),
            finished: None,
        })
    }

    /// The application tag from the gzip header of an archive being read.
    pub fn app_identification(&self) -> Option<&[u8]> {
        match &self.state {
            TarState::Reading {
                app_identification, ..
            } => app_identification.as_deref(),
            TarState::Writing { .. } => None,
        }
    }

    fn directory_exists(&self, prefix: &str) -> bool {
        match &self.state {
            TarState::Reading { files, dirs, .. } => {
                dirs.contains(prefix) || prefix_exists(files.keys().map(String::as_str), prefix)
            }
            TarState::Writing { written, .. } => {
                prefix_exists(written.iter().map(String::as_str), prefix)
            }
        }
    }
}

fn corrupt(err: std::io::Error) -> StoreError {
    ArchiveError::InvalidFormat {
        format: "tar",
        reason: err.to_string(),
    }
    .into()
}

fn normalize_member_name(name: &str) -> String {
    name.trim_start_matches("./").to_string()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Backend for TarBackend {
    fn name(&self) -> &'static str {
        "tar"
    }

    fn mode(&self) -> OpenMode {
        match self.state {
            TarState::Reading { .. } => OpenMode::Read,
            TarState::Writing { .. } => OpenMode::Write,
        }
    }

    fn open_write(&mut self, name: &str) -> StoreResult<WriteStream> {
        let TarState::Writing {
            builder, written, ..
        } = &mut self.state
        else {
            return Err(StoreError::WrongMode {
                mode: OpenMode::Read,
                operation: "open_write",
            });
        };
        if builder.is_none() {
            return Err(ArchiveError::Sealed.into());
        }
        if !written.insert(name.to_string()) {
            return Err(StoreError::DuplicateEntry(name.to_string()));
        }
        Ok(WriteStream::buffer())
    }

    fn close_write(&mut self, name: &str, stream: WriteStream) -> StoreResult<()> {
        let TarState::Writing { builder, .. } = &mut self.state else {
            return Err(StoreError::WrongMode {
                mode: OpenMode::Read,
                operation: "close_write",
            });
        };
        let builder = builder.as_mut().ok_or(ArchiveError::Sealed)?;
        let data = stream
            .into_buffer()
            .ok_or_else(|| ArchiveError::UnbufferedEntry(name.to_string()))?;

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(unix_now());
        builder.append_data(&mut header, name, data.as_slice())?;
        debug!(name, size = data.len(), "tar entry written");
        Ok(())
    }

    fn open_read(&mut self, name: &str) -> StoreResult<(ReadStream, u64)> {
        let TarState::Reading { files, .. } = &self.state else {
            return Err(StoreError::WrongMode {
                mode: OpenMode::Write,
                operation: "open_read",
            });
        };
        let data = files
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let size = data.len() as u64;
        Ok((read_stream_from_bytes(data), size))
    }

    fn enter_relative_directory(&mut self, dir: &str) -> bool {
        let mode = self.mode();
        let mut cursor = std::mem::take(&mut self.cursor);
        let entered = cursor.enter_relative(dir, mode, |prefix| self.directory_exists(prefix));
        self.cursor = cursor;
        entered
    }

    fn enter_absolute_directory(&mut self, path: &str) -> bool {
        let mode = self.mode();
        let mut cursor = std::mem::take(&mut self.cursor);
        let entered = cursor.enter_absolute(path, mode, |prefix| self.directory_exists(prefix));
        self.cursor = cursor;
        entered
    }

    fn file_exists(&self, name: &str) -> bool {
        match &self.state {
            TarState::Reading { files, .. } => files.contains_key(name),
            TarState::Writing { written, .. } => written.contains(name),
        }
    }

    fn entries(&self) -> Vec<String> {
        match &self.state {
            TarState::Reading { files, .. } => files.keys().cloned().collect(),
            TarState::Writing { written, .. } => written.iter().cloned().collect(),
        }
    }

    fn finalize_store(&mut self) -> StoreResult<()> {
        let TarState::Writing {
            builder, target, ..
        } = &mut self.state
        else {
            return Ok(());
        };
        let Some(builder) = builder.take() else {
            warn!("tar store finalized twice");
            return Err(ArchiveError::Sealed.into());
        };
        let encoder = builder.into_inner()?;
        let sink = encoder.finish()?;
        self.finished = sink.finish(target)?;
        debug!("tar store finalized");
        Ok(())
    }

    fn take_buffer(&mut self) -> Option<Vec<u8>> {
        self.finished.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    fn write_entry(backend: &mut TarBackend, name: &str, data: &[u8]) {
        let mut stream = backend.open_write(name).unwrap();
        stream.write_all(data).unwrap();
        backend.close_write(name, stream).unwrap();
    }

    fn read_entry(backend: &mut TarBackend, name: &str) -> Vec<u8> {
        let (mut stream, size) = backend.open_read(name).unwrap();
        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();
        assert_eq!(data.len() as u64, size);
        data
    }

    fn finished_bytes(mut backend: TarBackend) -> Vec<u8> {
        backend.finalize_store().unwrap();
        backend.take_buffer().unwrap()
    }

    #[test]
    fn memory_roundtrip_carries_app_tag_in_gzip_header() {
        let mut backend = TarBackend::create(ArchiveTarget::Memory, b"application/x-cds").unwrap();
        write_entry(&mut backend, "part0/maindoc.xml", b"<doc/>");
        write_entry(&mut backend, "content.xml", b"");
        let bytes = finished_bytes(backend);
        assert_eq!(&bytes[..2], &GZIP_MAGIC);

        let mut backend = TarBackend::open(ArchiveSource::Memory(bytes)).unwrap();
        assert_eq!(backend.app_identification(), Some(&b"application/x-cds"[..]));
        assert_eq!(read_entry(&mut backend, "part0/maindoc.xml"), b"<doc/>");
        assert_eq!(read_entry(&mut backend, "content.xml"), b"");
        assert_eq!(backend.entries(), vec!["content.xml", "part0/maindoc.xml"]);
    }

    #[test]
    fn long_names_survive() {
        let name = format!("{}/maindoc.xml", "part1/".repeat(40).trim_end_matches('/'));
        let mut backend = TarBackend::create(ArchiveTarget::Memory, b"").unwrap();
        write_entry(&mut backend, &name, b"deep");
        let bytes = finished_bytes(backend);
        let mut backend = TarBackend::open(ArchiveSource::Memory(bytes)).unwrap();
        assert_eq!(read_entry(&mut backend, &name), b"deep");
    }

    #[test]
    fn plain_tar_with_dot_prefix_is_accepted() {
        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_size(3);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        builder.append_data(&mut header, "./a/b.txt", &b"abc"[..]).unwrap();
        let mut dir = Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        builder.append_data(&mut dir, "./empty/", std::io::empty()).unwrap();
        let bytes = builder.into_inner().unwrap();

        let mut backend = TarBackend::open(ArchiveSource::Memory(bytes)).unwrap();
        assert_eq!(backend.app_identification(), None);
        assert_eq!(read_entry(&mut backend, "a/b.txt"), b"abc");
        assert!(backend.enter_relative_directory("empty"));
        assert!(backend.enter_absolute_directory("a"));
        assert!(!backend.enter_relative_directory("c"));
    }

    #[test]
    fn duplicate_and_missing_entries() {
        let mut backend = TarBackend::create(ArchiveTarget::Memory, b"").unwrap();
        write_entry(&mut backend, "x", b"1");
        assert!(matches!(backend.open_write("x"), Err(StoreError::DuplicateEntry(_))));
        let bytes = finished_bytes(backend);
        let mut backend = TarBackend::open(ArchiveSource::Memory(bytes)).unwrap();
        assert!(matches!(backend.open_read("y"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn nul_in_app_tag_rejected() {
        let err = TarBackend::create(ArchiveTarget::Memory, b"bad\0tag").err().unwrap();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn truncated_gzip_is_corrupt() {
        let mut backend = TarBackend::create(ArchiveTarget::Memory, b"").unwrap();
        write_entry(&mut backend, "a", &[7u8; 4096]);
        let mut bytes = finished_bytes(backend);
        bytes.truncate(bytes.len() / 2);
        let err = TarBackend::open(ArchiveSource::Memory(bytes)).err().unwrap();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn file_target_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.tgz");
        let mut backend = TarBackend::create(ArchiveTarget::File(path.clone()), b"app").unwrap();
        write_entry(&mut backend, "maindoc.xml", b"m");
        backend.finalize_store().unwrap();
        assert_eq!(backend.take_buffer(), None);

        let mut backend = TarBackend::open(ArchiveSource::File(path)).unwrap();
        assert_eq!(read_entry(&mut backend, "maindoc.xml"), b"m");
    }

    proptest! {
        #[test]
        fn entry_contents_roundtrip(
            entries in proptest::collection::btree_map("[a-z]{1,8}(/[a-z0-9]{1,8}){0,3}", proptest::collection::vec(any::<u8>(), 0..512), 1..6)
        ) {
            let mut backend = TarBackend::create(ArchiveTarget::Memory, b"").unwrap();
            for (name, data) in &entries {
                write_entry(&mut backend, name, data);
            }
            let bytes = finished_bytes(backend);
            let mut backend = TarBackend::open(ArchiveSource::Memory(bytes)).unwrap();
            for (name, data) in &entries {
                prop_assert_eq!(&read_entry(&mut backend, name), data);
            }
        }
    }
}
