use std::fmt;

use serde::{Deserialize, Serialize};

/// One step into a result tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// List index.
    Index(usize),
    /// Object field name (or alias).
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(index) => write!(f, "{index}"),
            PathSegment::Key(key) => f.write_str(key),
        }
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

/// Location of a node in a result tree. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<PathSegment>);

static ROOT: Path = Path(Vec::new());

impl Path {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Borrowed root path.
    pub fn root_ref() -> &'static Path {
        &ROOT
    }

    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// This path extended by one segment.
    pub fn child(&self, segment: impl Into<PathSegment>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// The path without its final segment, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        self.0
            .split_last()
            .map(|(_, parents)| Self(parents.to_vec()))
    }

    /// The final segment, or `None` at the root.
    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    /// The first `len` segments.
    pub fn prefix(&self, len: usize) -> Self {
        Self(self.0[..len.min(self.0.len())].to_vec())
    }

    /// The `/`-joined lookup key.
    pub fn key(&self) -> PathKey {
        PathKey::from(self)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match segment {
                PathSegment::Index(index) => write!(f, "{index}")?,
                PathSegment::Key(key) => write!(f, "{key:?}")?,
            }
        }
        f.write_str("]")
    }
}

impl From<Vec<PathSegment>> for Path {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }
}

impl<S: Into<PathSegment>> FromIterator<S> for Path {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// `/`-joined string form of a [`Path`], used as a lookup key.
///
/// The root path has the empty key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathKey(String);

impl PathKey {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&Path> for PathKey {
    fn from(path: &Path) -> Self {
        let mut key = String::new();
        for (i, segment) in path.segments().iter().enumerate() {
            if i > 0 {
                key.push('/');
            }
            key.push_str(&segment.to_string());
        }
        Self(key)
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build a [`Path`] from mixed field names and list indices.
///
/// ```
/// use patchwire_payload::{path, PathSegment};
///
/// let p = path!["products", 2, "price"];
/// assert_eq!(p.segments()[1], PathSegment::Index(2));
/// ```
#[macro_export]
macro_rules! path {
    () => { $crate::Path::root() };
    ($($segment:expr),+ $(,)?) => {
        $crate::Path::new(vec![$($crate::PathSegment::from($segment)),+])
    };
}
