//! Where an archive's bytes come from and go to: a file on disk or a memory
//! buffer.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

/// Largest up-front allocation made from a size an archive header declares.
const MAX_PREALLOC: usize = 64 * 1024;

/// Buffer for an entry of `declared` bytes. Headers can lie, so the initial
/// capacity is capped and `read_to_end` grows it as needed.
pub(crate) fn entry_buffer(declared: u64) -> Vec<u8> {
    Vec::with_capacity(declared.min(MAX_PREALLOC as u64) as usize)
}

/// Destination of an archive being written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveTarget {
    /// Written next to `path` and renamed into place on finalize.
    File(PathBuf),
    /// Kept in memory and handed out after finalize.
    Memory,
}

/// Origin of an archive being read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveSource {
    File(PathBuf),
    Memory(Vec<u8>),
}

impl ArchiveSource {
    /// Open a seekable reader over the source.
    pub fn reader(self) -> io::Result<SourceReader> {
        match self {
            Self::File(path) => Ok(SourceReader::File(BufReader::new(File::open(path)?))),
            Self::Memory(data) => Ok(SourceReader::Memory(Cursor::new(data))),
        }
    }

    /// Load the whole source into memory.
    pub fn into_bytes(self) -> io::Result<Vec<u8>> {
        match self {
            Self::File(path) => std::fs::read(path),
            Self::Memory(data) => Ok(data),
        }
    }
}

/// Seekable reader over an [`ArchiveSource`].
#[derive(Debug)]
pub enum SourceReader {
    File(BufReader<File>),
    Memory(Cursor<Vec<u8>>),
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(r) => r.read(buf),
            Self::Memory(r) => r.read(buf),
        }
    }
}

impl Seek for SourceReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::File(r) => r.seek(pos),
            Self::Memory(r) => r.seek(pos),
        }
    }
}

/// Seekable writer for an archive under construction.
#[derive(Debug)]
pub enum Sink {
    /// Temporary file in the destination's directory.
    File(NamedTempFile),
    Memory(Cursor<Vec<u8>>),
}

impl Sink {
    /// Create the sink for `target`.
    pub fn create(target: &ArchiveTarget) -> io::Result<Self> {
        match target {
            ArchiveTarget::File(path) => {
                let dir = match path.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent,
                    _ => Path::new("."),
                };
                let temp = tempfile::Builder::new()
                    .prefix(".cds-")
                    .suffix(".tmp")
                    .tempfile_in(dir)?;
                Ok(Self::File(temp))
            }
            ArchiveTarget::Memory => Ok(Self::Memory(Cursor::new(Vec::new()))),
        }
    }

    /// Move the finished archive to `target`. Returns the bytes for memory
    /// targets.
    pub fn finish(self, target: &ArchiveTarget) -> io::Result<Option<Vec<u8>>> {
        match (self, target) {
            (Self::File(temp), ArchiveTarget::File(path)) => {
                temp.as_file().sync_all()?;
                temp.persist(path).map_err(|e| e.error)?;
                debug!(path = %path.display(), "archive persisted");
                Ok(None)
            }
            (Self::Memory(cursor), ArchiveTarget::Memory) => Ok(Some(cursor.into_inner())),
            _ => Err(io::Error::other("archive sink does not match its target")),
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::File(f) => f.write(buf),
            Self::Memory(c) => c.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::File(f) => f.flush(),
            Self::Memory(c) => c.flush(),
        }
    }
}

impl Seek for Sink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::File(f) => f.seek(pos),
            Self::Memory(c) => c.seek(pos),
        }
    }
}
