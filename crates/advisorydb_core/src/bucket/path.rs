//! Validated bucket chains and bulk-scan specifications.

use crate::error::{CoreError, CoreResult};
use bytes::Bytes;
use std::fmt;

/// Marks a root name as a family prefix rather than a single bucket.
///
/// Sources that publish one root bucket per ecosystem name them
/// `"<ecosystem>::<source>"`; a scan over `"<ecosystem>::"` visits them all.
/// This is a naming convention only. Nothing checks which prefixes exist.
pub const ROOT_PREFIX_DELIMITER: &str = "::";

/// A chain of bucket names from a root bucket down.
///
/// Always holds at least one segment and no segment is empty, so every
/// operation that takes a `BucketPath` can rely on that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketPath {
    segments: Vec<String>,
}

impl BucketPath {
    /// Builds a path from its segments, root first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyBucketPath`] if there are no segments and
    /// [`CoreError::BucketNameRequired`] if any segment is empty.
    pub fn new<I, S>(segments: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(CoreError::EmptyBucketPath);
        }
        if segments.iter().any(String::is_empty) {
            return Err(CoreError::BucketNameRequired);
        }
        Ok(Self { segments })
    }

    /// A path naming a single root bucket.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNameRequired`] if `name` is empty.
    pub fn root(name: impl Into<String>) -> CoreResult<Self> {
        Self::new([name.into()])
    }

    /// Returns this path extended by one segment.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNameRequired`] if `name` is empty.
    pub fn child(&self, name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::BucketNameRequired);
        }
        let mut segments = self.segments.clone();
        segments.push(name);
        Ok(Self { segments })
    }

    /// Returns this path extended by every segment of `rest`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BucketNameRequired`] if any segment is empty.
    pub fn join<I, S>(&self, rest: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            self.segments
                .iter()
                .cloned()
                .chain(rest.into_iter().map(Into::into)),
        )
    }

    /// All segments, root first.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The root bucket name.
    #[must_use]
    pub fn root_name(&self) -> &str {
        &self.segments[0]
    }

    /// Segments below the root.
    #[must_use]
    pub fn nested(&self) -> &[String] {
        &self.segments[1..]
    }

    /// The enclosing path, or `None` for a root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        (self.segments.len() > 1).then(|| Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Number of segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// The raw bucket names used by the tree and the log.
    #[must_use]
    pub fn to_keys(&self) -> Vec<Bytes> {
        self.segments
            .iter()
            .map(|s| Bytes::copy_from_slice(s.as_bytes()))
            .collect()
    }
}

impl fmt::Display for BucketPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// How a scan picks its root buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootSelector {
    /// Exactly one root bucket.
    Literal(String),
    /// Every root bucket whose name starts with the prefix.
    Prefix(String),
}

impl RootSelector {
    /// Classifies `root`: names containing [`ROOT_PREFIX_DELIMITER`] select
    /// a family of roots by prefix.
    #[must_use]
    pub fn parse(root: &str) -> Self {
        if root.contains(ROOT_PREFIX_DELIMITER) {
            Self::Prefix(root.to_string())
        } else {
            Self::Literal(root.to_string())
        }
    }

    /// Returns `true` if the root bucket `name` is selected.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Literal(literal) => name == literal,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }

    /// The root name or prefix as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(s) | Self::Prefix(s) => s,
        }
    }
}

/// What a bulk scan reads: one or more roots and a nested chain under each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSpec {
    root: RootSelector,
    nested: Vec<String>,
}

impl ScanSpec {
    /// Builds a scan over `root` and the chain `nested` below it.
    ///
    /// A root alone cannot be scanned, so `nested` needs at least one name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ScanNotNested`] if `nested` is empty and
    /// [`CoreError::BucketNameRequired`] if any name is empty.
    pub fn new<I, S>(root: impl Into<String>, nested: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let root = root.into();
        let nested: Vec<String> = nested.into_iter().map(Into::into).collect();
        if root.is_empty() || nested.iter().any(String::is_empty) {
            return Err(CoreError::BucketNameRequired);
        }
        if nested.is_empty() {
            return Err(CoreError::ScanNotNested { path: root });
        }
        Ok(Self {
            root: RootSelector::parse(&root),
            nested,
        })
    }

    /// Builds a scan from a full chain, `[root, nested...]`.
    ///
    /// # Errors
    ///
    /// As [`ScanSpec::new`], plus [`CoreError::EmptyBucketPath`] for an
    /// empty chain.
    pub fn from_chain<I, S>(chain: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut iter = chain.into_iter().map(Into::into);
        let root: String = iter.next().ok_or(CoreError::EmptyBucketPath)?;
        Self::new(root, iter)
    }

    /// The root selector.
    #[must_use]
    pub fn root(&self) -> &RootSelector {
        &self.root
    }

    /// Names below each root.
    #[must_use]
    pub fn nested(&self) -> &[String] {
        &self.nested
    }

    /// The concrete path this scan reads under the root bucket `root_name`.
    #[must_use]
    pub fn path_for(&self, root_name: &str) -> BucketPath {
        let mut segments = Vec::with_capacity(self.nested.len() + 1);
        segments.push(root_name.to_string());
        segments.extend(self.nested.iter().cloned());
        BucketPath { segments }
    }
}

impl fmt::Display for ScanSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.root.as_str(), self.nested.join("/"))
    }
}
