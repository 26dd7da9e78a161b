use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use url::Url;

use crate::error::SdkError;

/// Where a store lives: a local path or a remote URL.
///
/// `file://` URLs are turned into local paths. Anything without a `scheme://`
/// prefix is a path, so Windows drive letters never parse as schemes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreLocation {
    Local(PathBuf),
    Remote(Url),
}

impl StoreLocation {
    pub fn parse(text: &str) -> Result<Self, SdkError> {
        if text.is_empty() {
            return Err(SdkError::InvalidLocation {
                location: text.to_string(),
                reason: "empty location".into(),
            });
        }
        if !text.contains("://") {
            return Ok(Self::Local(PathBuf::from(text)));
        }
        let url = Url::parse(text).map_err(|e| SdkError::InvalidLocation {
            location: text.to_string(),
            reason: e.to_string(),
        })?;
        if url.scheme() == "file" {
            let path = url.to_file_path().map_err(|()| SdkError::InvalidLocation {
                location: text.to_string(),
                reason: "file URL does not name a local path".into(),
            })?;
            return Ok(Self::Local(path));
        }
        Ok(Self::Remote(url))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            Self::Remote(_) => None,
        }
    }
}

impl FromStr for StoreLocation {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<PathBuf> for StoreLocation {
    fn from(path: PathBuf) -> Self {
        Self::Local(path)
    }
}

impl From<&Path> for StoreLocation {
    fn from(path: &Path) -> Self {
        Self::Local(path.to_path_buf())
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{url}"),
        }
    }
}
