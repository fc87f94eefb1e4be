//! Share-relative paths
//!
//! A [`PathRef`] is a canonicalized share-relative path: a list of
//! non-empty segments with no `.`/`..` and no separators inside a
//! segment. The share root is the empty list. Comparison is
//! byte-identical segment equality, which makes handle identity a plain
//! value comparison.

use std::fmt;

use crate::error::{Error, Result};

/// Canonical share-relative path
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathRef {
    segments: Vec<String>,
}

impl PathRef {
    /// The share root (empty segment list).
    pub fn root() -> Self {
        Self::default()
    }

    /// Build from pre-validated segments, validating each.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path = Self::root();
        for segment in segments {
            path = path.join(&segment.into())?;
        }
        Ok(path)
    }

    /// The segments, root-first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True for the share root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The last segment, if any.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The parent path; `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append one child name.
    ///
    /// Rejects names containing `/`, `\`, or NUL, the empty name, and
    /// `.` / `..` with [`Error::InvalidName`].
    pub fn join(&self, name: &str) -> Result<Self> {
        validate_name(name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    /// The relative segments of `candidate` below `self`, when it is
    /// self or a descendant; `None` otherwise.
    pub fn relative_to(&self, candidate: &Self) -> Option<Vec<String>> {
        candidate
            .segments
            .strip_prefix(self.segments.as_slice())
            .map(<[String]>::to_vec)
    }

    /// The wire form: `a/b/c`, or the empty string at the root.
    pub fn to_share_path(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for PathRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_share_path())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}
