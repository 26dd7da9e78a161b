use std::fs::File;
use std::io::{self, BufWriter, Cursor, Read, Seek, Write};

/// Readable, seekable byte source for one entry.
pub trait EntrySource: Read + Seek + Send {}

impl<T: Read + Seek + Send> EntrySource for T {}

/// Handle to an entry opened for reading.
pub type ReadStream = Box<dyn EntrySource>;

/// Wrap fully-materialized entry bytes as a read stream.
pub fn read_stream_from_bytes(data: Vec<u8>) -> ReadStream {
    Box::new(Cursor::new(data))
}

/// Handle to an entry opened for writing.
///
/// Archive backends need the complete entry before they can append it (TAR
/// headers carry the size, encrypted entries are sealed as a whole), so they
/// hand out `Buffer`. The directory backend streams straight to disk.
#[derive(Debug)]
pub enum WriteStream {
    Buffer(Vec<u8>),
    File(BufWriter<File>),
}

impl WriteStream {
    /// An empty in-memory buffer.
    pub fn buffer() -> Self {
        Self::Buffer(Vec::new())
    }

    /// Stream into an already-created file.
    pub fn file(file: File) -> Self {
        Self::File(BufWriter::new(file))
    }

    /// Recover the buffered bytes, if this is a buffer stream.
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        match self {
            Self::Buffer(data) => Some(data),
            Self::File(_) => None,
        }
    }
}

impl Write for WriteStream {
    /// Writes all of `buf` or fails; never reports a short write.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Buffer(data) => data.extend_from_slice(buf),
            Self::File(writer) => writer.write_all(buf)?,
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Buffer(_) => Ok(()),
            Self::File(writer) => writer.flush(),
        }
    }
}
