//! Store sessions for compound documents.
//!
//! A compound document is a container of named byte streams ("entries").
//! This crate provides the medium-independent part of reading and writing
//! one: a [`StoreSession`] that translates logical names into on-disk names
//! ([`naming`]), keeps a current directory, runs the open/read/write/close
//! protocol, and dispatches to exactly one [`Backend`].
//!
//! # Backends in this crate
//!
//! - [`DirectoryBackend`] -- one real file per entry under a root directory
//! - [`MemoryBackend`] -- `BTreeMap`-based store for tests and embedding
//!
//! Archive and encrypted backends live in `cds-archive` and `cds-crypto`.
//!
//! # Rules
//!
//! 1. A session has one backend, chosen at creation and never swapped.
//! 2. At most one entry is open at a time.
//! 3. Within one Write session every external name is written at most once.
//! 4. `finalize` runs exactly once, after the last entry is closed.
//! 5. Medium failures are returned as errors; protocol misuse is logged
//!    loudly and never corrected silently.

pub mod backend;
pub mod directory;
pub mod error;
pub mod memory;
pub mod naming;
pub mod session;
pub mod stream;

pub use backend::{prefix_exists, Backend, DirectoryCursor};
pub use directory::DirectoryBackend;
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryBackend, SharedEntries};
pub use naming::{expand_directory, validate_external_name, PathCodec};
pub use session::{SessionLimits, StoreSession, DEFAULT_COPY_CHUNK_SIZE};
pub use stream::{read_stream_from_bytes, EntrySource, ReadStream, WriteStream};
