//! Normalized drive-relative paths
//!
//! Every item on every drive is addressed by a [`DrivePath`]: a forward-slash
//! path relative to the drive root, always starting with `/`. The root itself
//! is `/`. Backslashes are converted, duplicate separators collapsed and a
//! trailing separator removed, so two spellings of the same location always
//! compare equal.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Forward-slash path relative to a drive root
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DrivePath(String);

impl DrivePath {
    /// Create a normalized path
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if any segment is `.` or `..`
    pub fn new(path: impl AsRef<str>) -> Result<Self, DomainError> {
        let raw = path.as_ref().replace('\\', "/");
        let mut normalized = String::with_capacity(raw.len() + 1);

        for segment in raw.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(DomainError::InvalidPath(format!(
                    "path contains relative segment: {}",
                    path.as_ref()
                )));
            }
            normalized.push('/');
            normalized.push_str(segment);
        }

        if normalized.is_empty() {
            normalized.push('/');
        }

        Ok(Self(normalized))
    }

    /// The drive root `/`
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Path segments, empty for the root
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Number of segments (0 for the root)
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Get the file name component (`None` for the root)
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit('/').next()
    }

    /// Get the parent path (`None` for the root)
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }

        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Join a single path component
    ///
    /// # Errors
    /// Returns error if the component is empty, contains a separator or is relative
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        if component.is_empty()
            || component.contains('/')
            || component.contains('\\')
            || component == "."
            || component == ".."
        {
            return Err(DomainError::InvalidPath(format!(
                "Invalid path component: {component}"
            )));
        }

        if self.is_root() {
            Ok(Self(format!("/{component}")))
        } else {
            Ok(Self(format!("{}/{component}", self.0)))
        }
    }

    /// Replace the last segment, keeping the parent
    ///
    /// # Errors
    /// Returns error for the root or an invalid name
    pub fn with_file_name(&self, name: &str) -> Result<Self, DomainError> {
        let parent = self
            .parent()
            .ok_or_else(|| DomainError::InvalidPath("root has no file name".to_string()))?;
        parent.join(name)
    }

    /// Whether `self` is a strict ancestor of `other`.
    ///
    /// Requires fewer segments than `other`, a plain string prefix, and that
    /// the segment of `other` at this path's depth equals this path's last
    /// segment. The last check rejects `/documents` against
    /// `/documents - Copy/x`, which a bare prefix test would accept.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &DrivePath) -> bool {
        let own: Vec<&str> = self.segments().collect();
        let theirs: Vec<&str> = other.segments().collect();

        if own.len() >= theirs.len() || !other.0.starts_with(&self.0) {
            return false;
        }

        match own.last() {
            Some(last) => theirs[own.len() - 1] == *last,
            None => true,
        }
    }

    /// Resolve this path below a filesystem root
    #[must_use]
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in self.segments() {
            path.push(segment);
        }
        path
    }

    /// Express a filesystem path relative to `root`
    ///
    /// Returns `None` if `path` is not inside `root` or is not valid UTF-8.
    #[must_use]
    pub fn from_fs_path(root: &Path, path: &Path) -> Option<Self> {
        let relative = path.strip_prefix(root).ok()?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => segments.push(part.to_str()?),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Self::new(segments.join("/")).ok()
    }
}

impl Display for DrivePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DrivePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DrivePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<DrivePath> for String {
    fn from(path: DrivePath) -> Self {
        path.0
    }
}
