use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Whether a session reads an existing container or writes a new one.
///
/// A session never mixes the two.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenMode {
    Read,
    Write,
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

impl FromStr for OpenMode {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" | "r" => Ok(Self::Read),
            "write" | "w" => Ok(Self::Write),
            other => Err(TypeError::UnknownMode(other.to_string())),
        }
    }
}

/// Physical medium backing a store.
///
/// `Auto` is only meaningful as a request to the factory: it never describes
/// an opened store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Auto,
    /// gzip-compressed TAR archive.
    Tar,
    /// ZIP archive.
    Zip,
    /// Plain directory tree, one real file per entry.
    Directory,
    /// ZIP archive with per-entry encryption.
    Encrypted,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Tar => write!(f, "tar"),
            Self::Zip => write!(f, "zip"),
            Self::Directory => write!(f, "directory"),
            Self::Encrypted => write!(f, "encrypted"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "tar" | "tgz" => Ok(Self::Tar),
            "zip" => Ok(Self::Zip),
            "directory" | "dir" => Ok(Self::Directory),
            "encrypted" => Ok(Self::Encrypted),
            other => Err(TypeError::UnknownBackend(other.to_string())),
        }
    }
}
