use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical name of the main document entry of the current directory.
pub const ROOT_PART: &str = "root";

/// On-disk file name the main document of a part expands to.
pub const MAIN_DOCUMENT_NAME: &str = "maindoc.xml";

/// Prefix marking a logical name as absolute (`tar:/0/1`).
pub const ABSOLUTE_PREFIX: &str = "tar:/";

/// Literal prepended to purely numeric segments when names are expanded.
pub const PART_PREFIX: &str = "part";

/// Longest external name a backend accepts.
pub const DEFAULT_MAX_NAME_LEN: usize = 512;

/// Convention used to turn logical names into on-disk names.
///
/// | logical  | `Legacy2`              | `Legacy1`     | `Raw`   |
/// |----------|------------------------|---------------|---------|
/// | `0`      | `part0/maindoc.xml`    | `part0.xml`   | `0`     |
/// | `0/1`    | `part0/part1/maindoc.xml` | `part0/part1.xml` | `0/1` |
/// | `0/pic`  | `part0/pic`            | `part0/pic`   | `0/pic` |
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamingPolicy {
    /// Older layout: numbered parts are flat `part<N>.xml` files.
    Legacy1,
    /// Modern layout: numbered parts are `part<N>/maindoc.xml` directories.
    #[default]
    Legacy2,
    /// No expansion at all; names are used verbatim.
    Raw,
}

impl NamingPolicy {
    /// Whether this policy rewrites names at all.
    pub fn expands(self) -> bool {
        !matches!(self, Self::Raw)
    }
}

impl fmt::Display for NamingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy1 => write!(f, "legacy-1"),
            Self::Legacy2 => write!(f, "legacy-2"),
            Self::Raw => write!(f, "raw"),
        }
    }
}
