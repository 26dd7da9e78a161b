//! High-level API for compound document stores.
//!
//! [`StoreFactory`] turns a location, an open mode, and a backend choice
//! (possibly `Auto`) into a ready [`StoreSession`]:
//!
//! ```no_run
//! use cds_sdk::{StoreConfig, StoreFactory};
//! use cds_types::{BackendKind, OpenMode};
//!
//! let factory = StoreFactory::new(StoreConfig::default());
//! let mut store = factory
//!     .create_store("report.cds".as_ref(), OpenMode::Write, b"", BackendKind::Auto)?;
//! store.open("root")?;
//! store.write(b"<document/>")?;
//! store.close()?;
//! store.finalize()?;
//! # Ok::<(), cds_sdk::SdkError>(())
//! ```
//!
//! Remote locations need a [`RemoteTransport`]; the container is copied to
//! a local temporary file, which is removed when the session is dropped.

pub mod config;
pub mod error;
pub mod factory;
pub mod location;
pub mod remote;

pub use cds_store::{StoreError, StoreResult, StoreSession};
pub use config::{StoreConfig, DEFAULT_APP_IDENTIFICATION};
pub use error::{SdkError, SdkResult};
pub use factory::{create_store, StoreFactory};
pub use location::StoreLocation;
pub use remote::{RemoteBackend, RemoteTransport};
