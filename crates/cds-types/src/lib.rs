//! Foundation types for the compound document store (CDS).
//!
//! A compound document is a set of named byte streams ("entries") kept in one
//! physical container: a ZIP archive, a gzip'd TAR archive, a plain directory
//! tree, or an encrypted ZIP. Every other CDS crate depends on `cds-types`.
//!
//! # Key Types
//!
//! - [`OpenMode`] -- read or write, fixed for the lifetime of a session
//! - [`BackendKind`] -- which physical medium backs a store
//! - [`NamingPolicy`] -- how logical names expand to on-disk names

pub mod error;
pub mod mode;
pub mod policy;

pub use error::TypeError;
pub use mode::{BackendKind, OpenMode};
pub use policy::{
    NamingPolicy, ABSOLUTE_PREFIX, DEFAULT_MAX_NAME_LEN, MAIN_DOCUMENT_NAME, PART_PREFIX,
    ROOT_PART,
};
