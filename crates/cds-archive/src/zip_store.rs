use std::collections::BTreeSet;
use std::io::{Read, Write};

use cds_store::{
    prefix_exists, read_stream_from_bytes, Backend, DirectoryCursor, ReadStream, StoreError,
    StoreResult, WriteStream,
};
use cds_types::OpenMode;
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ArchiveError;
use crate::medium::{entry_buffer, ArchiveSource, ArchiveTarget, Sink, SourceReader};

/// Name of the uncompressed first entry carrying the application tag.
pub const MIMETYPE_ENTRY: &str = "mimetype";

enum ZipState {
    Reading {
        archive: ZipArchive<SourceReader>,
        files: BTreeSet<String>,
    },
    Writing {
        writer: Option<ZipWriter<Sink>>,
        target: ArchiveTarget,
        written: BTreeSet<String>,
    },
}

/// ZIP archive backend, over a file or a memory buffer.
///
/// Entries are buffered while open and deflated into the archive on close.
/// A name can be written once per archive; a second `open_write` fails with
/// `DuplicateEntry`.
pub struct ZipBackend {
    state: ZipState,
    cursor: DirectoryCursor,
    finished: Option<Vec<u8>>,
}

impl ZipBackend {
    /// Start a new archive at `target`. A non-empty `app_identification` is
    /// stored uncompressed as the first entry, [`MIMETYPE_ENTRY`].
    pub fn create(target: ArchiveTarget, app_identification: &[u8]) -> StoreResult<Self> {
        let sink = Sink::create(&target)?;
        let mut writer = ZipWriter::new(sink);
        let mut written = BTreeSet::new();
        if !app_identification.is_empty() {
            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            writer
                .start_file(MIMETYPE_ENTRY, options)
                .map_err(ArchiveError::from)?;
            writer.write_all(app_identification)?;
            written.insert(MIMETYPE_ENTRY.to_string());
        }
        debug!(?target, "zip store created");
        Ok(Self {
            state: ZipState::Writing {
                writer: Some(writer),
                target,
                written,
            },
            cursor: DirectoryCursor::default(),
            finished: None,
        })
    }

    /// Open an existing archive.
    pub fn open(source: ArchiveSource) -> StoreResult<Self> {
        let reader = source.reader()?;
        let archive = ZipArchive::new(reader).map_err(|e| match e {
            ZipError::Io(io) => StoreError::Io(io),
            other => StoreError::Corrupt(format!("not a zip archive: {other}")),
        })?;
        let files = archive
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(str::to_string)
            .collect::<BTreeSet<_>>();
        debug!(entries = files.len(), "zip store opened");
        Ok(Self {
            state: ZipState::Reading { archive, files },
            cursor: DirectoryCursor::default(),
            finished: None,
        })
    }

    /// The application tag of an archive being read, if it has one.
    pub fn app_identification(&mut self) -> Option<Vec<u8>> {
        let ZipState::Reading { archive, .. } = &mut self.state else {
            return None;
        };
        let mut entry = archive.by_name(MIMETYPE_ENTRY).ok()?;
        let mut tag = Vec::new();
        entry.read_to_end(&mut tag).ok()?;
        Some(tag)
    }

    fn names(&self) -> Vec<&str> {
        match &self.state {
            ZipState::Reading { files, .. } => files.iter().map(String::as_str).collect(),
            ZipState::Writing { written, .. } => written.iter().map(String::as_str).collect(),
        }
    }
}

impl Backend for ZipBackend {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn mode(&self) -> OpenMode {
        match self.state {
            ZipState::Reading { .. } => OpenMode::Read,
            ZipState::Writing { .. } => OpenMode::Write,
        }
    }

    fn open_write(&mut self, name: &str) -> StoreResult<WriteStream> {
        let ZipState::Writing { written, writer, .. } = &mut self.state else {
            return Err(StoreError::WrongMode {
                mode: OpenMode::Read,
                operation: "open_write",
            });
        };
        if writer.is_none() {
            return Err(ArchiveError::Sealed.into());
        }
        if !written.insert(name.to_string()) {
            return Err(StoreError::DuplicateEntry(name.to_string()));
        }
        Ok(WriteStream::buffer())
    }

    fn close_write(&mut self, name: &str, stream: WriteStream) -> StoreResult<()> {
        let ZipState::Writing { writer, .. } = &mut self.state else {
            return Err(StoreError::WrongMode {
                mode: OpenMode::Read,
                operation: "close_write",
            });
        };
        let writer = writer.as_mut().ok_or(ArchiveError::Sealed)?;
        let data = stream
            .into_buffer()
            .ok_or_else(|| ArchiveError::UnbufferedEntry(name.to_string()))?;
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file(name, options).map_err(ArchiveError::from)?;
        writer.write_all(&data)?;
        debug!(name, size = data.len(), "zip entry written");
        Ok(())
    }

    fn open_read(&mut self, name: &str) -> StoreResult<(ReadStream, u64)> {
        let ZipState::Reading { archive, .. } = &mut self.state else {
            return Err(StoreError::WrongMode {
                mode: OpenMode::Write,
                operation: "open_read",
            });
        };
        let mut entry = match archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Err(StoreError::NotFound(name.to_string())),
            Err(e) => return Err(ArchiveError::from(e).into()),
        };
        let size = entry.size();
        let mut data = entry_buffer(size);
        entry.read_to_end(&mut data)?;
        Ok((read_stream_from_bytes(data), size))
    }

    fn enter_relative_directory(&mut self, dir: &str) -> bool {
        let mode = self.mode();
        let names: Vec<String> = self.names().into_iter().map(str::to_string).collect();
        self.cursor.enter_relative(dir, mode, |prefix| {
            prefix_exists(names.iter().map(String::as_str), prefix)
        })
    }

    fn enter_absolute_directory(&mut self, path: &str) -> bool {
        let mode = self.mode();
        let names: Vec<String> = self.names().into_iter().map(str::to_string).collect();
        self.cursor.enter_absolute(path, mode, |prefix| {
            prefix_exists(names.iter().map(String::as_str), prefix)
        })
    }

    fn file_exists(&self, name: &str) -> bool {
        match &self.state {
            ZipState::Reading { files, .. } => files.contains(name),
            ZipState::Writing { written, .. } => written.contains(name),
        }
    }

    fn entries(&self) -> Vec<String> {
        self.names().into_iter().map(str::to_string).collect()
    }

    fn finalize_store(&mut self) -> StoreResult<()> {
        let ZipState::Writing { writer, target, .. } = &mut self.state else {
            return Ok(());
        };
        let Some(writer) = writer.take() else {
            warn!("zip store finalized twice");
            return Err(ArchiveError::Sealed.into());
        };
        let sink = writer.finish().map_err(ArchiveError::from)?;
        self.finished = sink.finish(target)?;
        debug!("zip store finalized");
        Ok(())
    }

    fn take_buffer(&mut self) -> Option<Vec<u8>> {
        self.finished.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_entry(backend: &mut ZipBackend, name: &str, data: &[u8]) {
        let mut stream = backend.open_write(name).unwrap();
        stream.write_all(data).unwrap();
        backend.close_write(name, stream).unwrap();
    }

    fn read_entry(backend: &mut ZipBackend, name: &str) -> Vec<u8> {
        let (mut stream, size) = backend.open_read(name).unwrap();
        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();
        assert_eq!(data.len() as u64, size);
        data
    }

    #[test]
    fn memory_roundtrip_with_app_tag() {
        let mut backend = ZipBackend::create(ArchiveTarget::Memory, b"application/x-cds").unwrap();
        write_entry(&mut backend, "part0/maindoc.xml", b"<doc/>");
        write_entry(&mut backend, "pictures/p.png", &[0u8; 10_000]);
        backend.finalize_store().unwrap();
        let bytes = backend.take_buffer().unwrap();
        assert_eq!(&bytes[..4], b"PK\x03\x04");

        let mut backend = ZipBackend::open(ArchiveSource::Memory(bytes)).unwrap();
        assert_eq!(backend.app_identification().unwrap(), b"application/x-cds");
        assert_eq!(read_entry(&mut backend, "part0/maindoc.xml"), b"<doc/>");
        assert_eq!(read_entry(&mut backend, "pictures/p.png"), vec![0u8; 10_000]);
        assert_eq!(
            backend.entries(),
            vec!["mimetype", "part0/maindoc.xml", "pictures/p.png"]
        );
    }

    #[test]
    fn file_target_written_on_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.zip");
        let mut backend = ZipBackend::create(ArchiveTarget::File(path.clone()), b"").unwrap();
        write_entry(&mut backend, "content.xml", b"c");
        assert!(!path.exists());
        backend.finalize_store().unwrap();
        assert!(path.exists());

        let mut backend = ZipBackend::open(ArchiveSource::File(path)).unwrap();
        assert!(backend.file_exists("content.xml"));
        assert!(!backend.file_exists("mimetype"));
        assert_eq!(read_entry(&mut backend, "content.xml"), b"c");
    }

    #[test]
    fn duplicate_entry_rejected() {
        let mut backend = ZipBackend::create(ArchiveTarget::Memory, b"").unwrap();
        write_entry(&mut backend, "a.xml", b"1");
        assert!(matches!(
            backend.open_write("a.xml"),
            Err(StoreError::DuplicateEntry(_))
        ));
        backend.finalize_store().unwrap();
    }

    #[test]
    fn missing_entry_not_found() {
        let mut backend = ZipBackend::create(ArchiveTarget::Memory, b"").unwrap();
        backend.finalize_store().unwrap();
        let bytes = backend.take_buffer().unwrap();
        let mut backend = ZipBackend::open(ArchiveSource::Memory(bytes)).unwrap();
        assert!(matches!(backend.open_read("nope"), Err(StoreError::NotFound(ref name)) if name == "nope"));
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = ZipBackend::open(ArchiveSource::Memory(vec![0x42; 256]))
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn read_mode_directories() {
        let mut backend = ZipBackend::create(ArchiveTarget::Memory, b"").unwrap();
        write_entry(&mut backend, "part0/part1/maindoc.xml", b"x");
        backend.finalize_store().unwrap();
        let bytes = backend.take_buffer().unwrap();

        let mut backend = ZipBackend::open(ArchiveSource::Memory(bytes)).unwrap();
        assert!(backend.enter_relative_directory("part0"));
        assert!(backend.enter_relative_directory("part1"));
        assert!(!backend.enter_relative_directory("part2"));
        assert!(backend.enter_absolute_directory("part0/"));
        assert!(backend.enter_absolute_directory(""));
        assert!(!backend.enter_relative_directory("pictures"));
    }
}
