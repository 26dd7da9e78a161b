//! Archive backends for the compound document store.
//!
//! Both formats buffer an entry while it is open and append it to the
//! archive on close. Archives written to a file are built in a temporary file
//! next to the destination and renamed into place when the store is
//! finalized, so a crashed writer never leaves a half-written archive behind.
//!
//! # Formats
//!
//! - [`ZipBackend`] -- deflated ZIP, application tag in a `mimetype` entry
//! - [`TarBackend`] -- gzip'd TAR, application tag in the gzip header
//!
//! [`magic`] tells the two apart from the first bytes of a container.

pub mod error;
pub mod magic;
pub mod medium;
pub mod tar_store;
pub mod zip_store;

pub use error::ArchiveError;
pub use magic::{
    determine_backend, sniff_magic, sniff_path, sniff_reader, GZIP_MAGIC, SNIFF_LEN, ZIP_MAGIC,
};
pub use medium::{ArchiveSource, ArchiveTarget, Sink, SourceReader};
pub use tar_store::TarBackend;
pub use zip_store::{ZipBackend, MIMETYPE_ENTRY};
