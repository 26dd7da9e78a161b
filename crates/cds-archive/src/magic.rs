//! Container format detection from the first bytes of a stream.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use cds_types::BackendKind;

/// gzip member header; a gzip'd TAR starts with it.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// ZIP local file header signature.
pub const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];

/// Number of bytes the sniffer looks at.
pub const SNIFF_LEN: usize = 4;

/// Classify a 4-byte prefix. `None` means no known signature.
pub fn sniff_magic(prefix: &[u8; SNIFF_LEN]) -> Option<BackendKind> {
    if prefix[..2] == GZIP_MAGIC {
        Some(BackendKind::Tar)
    } else if *prefix == ZIP_MAGIC {
        Some(BackendKind::Zip)
    } else {
        None
    }
}

/// Read up to [`SNIFF_LEN`] bytes and classify them.
///
/// Returns `Ok(None)` when the stream is shorter than [`SNIFF_LEN`] or
/// carries no known signature. The reader is left somewhere past its start;
/// callers must reopen or rewind before parsing the container.
pub fn sniff_reader<R: Read>(reader: &mut R) -> io::Result<Option<BackendKind>> {
    let mut prefix = [0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < SNIFF_LEN {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) => return Ok(None),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(sniff_magic(&prefix))
}

/// Pick the backend for `reader`, falling back to `default` when the
/// signature is unknown or the stream is too short.
pub fn determine_backend<R: Read>(reader: &mut R, default: BackendKind) -> BackendKind {
    match sniff_reader(reader) {
        Ok(Some(kind)) => kind,
        Ok(None) | Err(_) => default,
    }
}

/// Sniff the file at `path`.
pub fn sniff_path(path: &Path) -> io::Result<Option<BackendKind>> {
    let mut file = File::open(path)?;
    sniff_reader(&mut file)
}
