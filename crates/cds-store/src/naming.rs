//! Translation between logical entry names and on-disk names.
//!
//! Callers address entries with logical names:
//!
//! - `root` -- the main document of the current directory
//! - `tar:/0/1` -- an absolute reference to a numbered part
//! - `pictures/picture0.png` -- anything else, relative to the current directory
//!
//! Under the expanding policies every purely numeric directory segment `N`
//! becomes `partN`. A numeric final segment becomes `partN/maindoc.xml`
//! (`Legacy2`) or `partN.xml` (`Legacy1`). `Raw` leaves names untouched.

use cds_types::{
    NamingPolicy, OpenMode, ABSOLUTE_PREFIX, MAIN_DOCUMENT_NAME, PART_PREFIX, ROOT_PART,
};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Returns `true` if `segment` is non-empty and made only of ASCII digits.
pub fn is_numeric_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Expand every numeric segment of a directory path.
///
/// Slashes, including a trailing one, are preserved. `Raw` is the identity.
pub fn expand_directory(path: &str, policy: NamingPolicy) -> String {
    if !policy.expands() {
        return path.to_string();
    }
    let mut result = String::with_capacity(path.len() + 8);
    for (i, segment) in path.split('/').enumerate() {
        if i > 0 {
            result.push('/');
        }
        if is_numeric_segment(segment) {
            result.push_str(PART_PREFIX);
        }
        result.push_str(segment);
    }
    result
}

/// Expand the numeric final segment `n` of a file name under `policy`.
fn expand_part_file(dir: &str, number: &str, policy: NamingPolicy) -> String {
    match policy {
        NamingPolicy::Legacy1 => format!("{dir}{PART_PREFIX}{number}.xml"),
        _ => format!("{dir}{PART_PREFIX}{number}/{MAIN_DOCUMENT_NAME}"),
    }
}

/// Check an external name against the backend's path ceiling and reject
/// names that would escape the container.
pub fn validate_external_name(name: &str, max_len: usize) -> StoreResult<()> {
    let len = name.chars().count();
    if len > max_len {
        return Err(StoreError::PathTooLong {
            name: name.to_string(),
            len,
            max: max_len,
        });
    }
    if name.is_empty() {
        return Err(StoreError::InvalidName {
            name: name.to_string(),
            reason: "name must not be empty".into(),
        });
    }
    if name.starts_with('/') {
        return Err(StoreError::InvalidName {
            name: name.to_string(),
            reason: "name must be relative to the container root".into(),
        });
    }
    if name.split('/').any(|segment| segment == "..") {
        return Err(StoreError::InvalidName {
            name: name.to_string(),
            reason: "name must not contain '..' segments".into(),
        });
    }
    Ok(())
}

/// Stateful name translator owned by a session.
///
/// The policy starts as given and may downgrade from `Legacy2` to `Legacy1`
/// exactly once: the first time a numeric part is resolved in Read mode, the
/// codec asks the backend whether the `Legacy1` file (`partN.xml`) exists. If
/// it does, the container was written by older software and the policy sticks
/// at `Legacy1`. The probe never runs again either way.
#[derive(Clone, Debug)]
pub struct PathCodec {
    policy: NamingPolicy,
    legacy_probe_pending: bool,
}

impl PathCodec {
    /// Create a codec for a session opened in `mode`.
    pub fn new(policy: NamingPolicy, mode: OpenMode) -> Self {
        Self {
            policy,
            legacy_probe_pending: mode == OpenMode::Read && policy == NamingPolicy::Legacy2,
        }
    }

    /// The currently active policy.
    pub fn policy(&self) -> NamingPolicy {
        self.policy
    }

    /// Whether the one-shot legacy probe is still to come.
    pub fn legacy_probe_pending(&self) -> bool {
        self.legacy_probe_pending
    }

    /// Switch to `Raw` for the rest of the session.
    pub fn disallow_expansion(&mut self) {
        self.policy = NamingPolicy::Raw;
        self.legacy_probe_pending = false;
    }

    /// Expand a directory path under the active policy.
    pub fn expand_directory(&self, path: &str) -> String {
        expand_directory(path, self.policy)
    }

    /// Resolve a logical name against `current_path` (raw segments, each
    /// followed by `/`).
    ///
    /// `exists` is consulted at most once per codec lifetime, for the legacy
    /// probe. This takes `&mut self` because that probe may change the policy.
    pub fn to_external_name<F>(&mut self, logical: &str, current_path: &str, exists: F) -> String
    where
        F: FnMut(&str) -> bool,
    {
        if logical == ROOT_PART {
            return format!("{}{MAIN_DOCUMENT_NAME}", self.expand_directory(current_path));
        }
        let intern = match logical.strip_prefix(ABSOLUTE_PREFIX) {
            Some(absolute) => absolute.to_string(),
            None => format!("{current_path}{logical}"),
        };
        self.expand_path(&intern, exists)
    }

    /// Expand a full internal path (directory part plus file name).
    pub fn expand_path<F>(&mut self, intern: &str, mut exists: F) -> String
    where
        F: FnMut(&str) -> bool,
    {
        if !self.policy.expands() {
            return intern.to_string();
        }
        let (dir, file) = match intern.rfind('/') {
            Some(pos) => (
                format!("{}/", expand_directory(&intern[..pos], self.policy)),
                &intern[pos + 1..],
            ),
            None => (String::new(), intern),
        };

        if !is_numeric_segment(file) {
            return format!("{dir}{file}");
        }

        if self.legacy_probe_pending {
            self.legacy_probe_pending = false;
            let legacy = expand_part_file(&dir, file, NamingPolicy::Legacy1);
            if exists(&legacy) {
                debug!(probe = %legacy, "legacy part layout detected; switching naming policy");
                self.policy = NamingPolicy::Legacy1;
            }
        }
        expand_part_file(&dir, file, self.policy)
    }
}
