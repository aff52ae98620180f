//! Field paths and document variables.
//!
//! A [`FieldPath`] addresses a position inside a document: a non-empty
//! sequence of [`Leaf`] steps, each either an object field name or an array
//! index. Paths compare by *element-wise* prefix, never by string prefix, so
//! `a.bcd` is not a prefix of `a.b`.
//!
//! A [`DocVar`] is a typed reference into the document stream of an
//! aggregation pipeline: a scope (the root document or the current element)
//! plus an optional path below it.

use std::fmt;

/// One step of a field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Leaf {
    /// An object field name.
    Name(String),
    /// An array index.
    Index(i64),
}

impl Leaf {
    /// Creates a name leaf.
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Returns the field name if this is a name leaf.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(n) => Some(n),
            Self::Index(_) => None,
        }
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(n) => write!(f, "{n}"),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Leaf {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Leaf {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<i64> for Leaf {
    fn from(index: i64) -> Self {
        Self::Index(index)
    }
}

/// A non-empty sequence of leaves addressing a position in a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<Leaf>);

impl FieldPath {
    /// Creates a single-leaf path.
    #[must_use]
    pub fn leaf(leaf: impl Into<Leaf>) -> Self {
        Self(vec![leaf.into()])
    }

    /// Creates a single-name path.
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self(vec![Leaf::Name(name.into())])
    }

    /// Creates a path from a non-empty leaf sequence.
    ///
    /// Returns `None` for an empty sequence; paths are never empty.
    #[must_use]
    pub fn from_leaves(leaves: Vec<Leaf>) -> Option<Self> {
        if leaves.is_empty() {
            None
        } else {
            Some(Self(leaves))
        }
    }

    /// Parses a dotted path such as `"address.city"` or `"tags.0"`.
    ///
    /// Segments of decimal digits become [`Leaf::Index`]; everything else is
    /// a [`Leaf::Name`]. Returns `None` for the empty string.
    #[must_use]
    pub fn dotted(path: &str) -> Option<Self> {
        if path.is_empty() {
            return None;
        }
        let leaves = path
            .split('.')
            .map(|seg| match seg.parse::<i64>() {
                Ok(i) if !seg.is_empty() => Leaf::Index(i),
                _ => Leaf::Name(seg.to_string()),
            })
            .collect();
        Some(Self(leaves))
    }

    /// Returns the leaves of this path.
    #[must_use]
    pub fn leaves(&self) -> &[Leaf] {
        &self.0
    }

    /// Returns the number of leaves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Paths are never empty; this always returns `false`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns the first leaf.
    #[must_use]
    pub fn head(&self) -> &Leaf {
        &self.0[0]
    }

    /// Returns the path after the first leaf, or `None` for a single leaf.
    #[must_use]
    pub fn tail(&self) -> Option<FieldPath> {
        Self::from_leaves(self.0[1..].to_vec())
    }

    /// Returns a new path with `leaf` appended.
    #[must_use]
    pub fn child(&self, leaf: impl Into<Leaf>) -> Self {
        let mut leaves = self.0.clone();
        leaves.push(leaf.into());
        Self(leaves)
    }

    /// Returns the concatenation `self ++ other`.
    #[must_use]
    pub fn concat(&self, other: &FieldPath) -> Self {
        let mut leaves = self.0.clone();
        leaves.extend(other.0.iter().cloned());
        Self(leaves)
    }

    /// Returns the concatenation of this path and extra leaves.
    #[must_use]
    pub fn concat_leaves(&self, extra: &[Leaf]) -> Self {
        let mut leaves = self.0.clone();
        leaves.extend(extra.iter().cloned());
        Self(leaves)
    }

    /// True if `prefix` is an element-wise prefix of this path.
    #[must_use]
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// True if either path is an element-wise prefix of the other.
    #[must_use]
    pub fn related(&self, other: &FieldPath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// The remainder of this path after stripping `prefix`, if any remains.
    #[must_use]
    pub fn strip_prefix(&self, prefix: &FieldPath) -> Option<FieldPath> {
        if self.starts_with(prefix) {
            Self::from_leaves(self.0[prefix.0.len()..].to_vec())
        } else {
            None
        }
    }

    /// Returns the field name if this path is a single name leaf.
    #[must_use]
    pub fn as_single_name(&self) -> Option<&str> {
        match self.0.as_slice() {
            [Leaf::Name(n)] => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, leaf) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{leaf}")?;
        }
        Ok(())
    }
}

impl From<Leaf> for FieldPath {
    fn from(leaf: Leaf) -> Self {
        Self(vec![leaf])
    }
}

/// The binding a [`DocVar`] is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// The root document of the pipeline stage.
    Root,
    /// The current element (inside array traversals).
    Current,
}

/// A reference to a position in the document stream: a scope plus an
/// optional path below it. `DocVar::root()` with no path denotes the whole
/// root document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocVar {
    /// The scope the path is resolved against.
    pub scope: Scope,
    /// The path below the scope; `None` means the scope itself.
    pub path: Option<FieldPath>,
}

impl DocVar {
    /// The whole root document.
    #[must_use]
    pub const fn root() -> Self {
        Self { scope: Scope::Root, path: None }
    }

    /// A path below the root document.
    #[must_use]
    pub const fn root_at(path: FieldPath) -> Self {
        Self { scope: Scope::Root, path: Some(path) }
    }

    /// A single-name path below the root document.
    #[must_use]
    pub fn field(name: impl Into<String>) -> Self {
        Self::root_at(FieldPath::name(name))
    }

    /// The whole current element.
    #[must_use]
    pub const fn current() -> Self {
        Self { scope: Scope::Current, path: None }
    }

    /// The document identifier, `ROOT("_id")`.
    #[must_use]
    pub fn id() -> Self {
        Self::field("_id")
    }

    /// Returns a var extended with the given extra leaves.
    #[must_use]
    pub fn descend(&self, extra: &[Leaf]) -> Self {
        if extra.is_empty() {
            return self.clone();
        }
        let path = match &self.path {
            Some(p) => p.concat_leaves(extra),
            None => FieldPath(extra.to_vec()),
        };
        Self { scope: self.scope, path: Some(path) }
    }

    /// True if either var's path is a prefix of the other's.
    ///
    /// A var with no path references the whole scope and is related to
    /// every var in the same scope.
    #[must_use]
    pub fn related(&self, other: &DocVar) -> bool {
        if self.scope != other.scope {
            return false;
        }
        match (&self.path, &other.path) {
            (None, _) | (_, None) => true,
            (Some(a), Some(b)) => a.related(b),
        }
    }

    /// The external (pipeline) rendering: `"$a.b"`, `"$$ROOT"`, `"$$CURRENT"`.
    #[must_use]
    pub fn render(&self) -> String {
        match (&self.scope, &self.path) {
            (Scope::Root, Some(p)) => format!("${p}"),
            (Scope::Root, None) => "$$ROOT".to_string(),
            (Scope::Current, Some(p)) => format!("$$CURRENT.{p}"),
            (Scope::Current, None) => "$$CURRENT".to_string(),
        }
    }
}

impl fmt::Display for DocVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}
