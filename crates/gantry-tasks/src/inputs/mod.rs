//! Input resolution: turning input specifications into concrete files

mod go;
mod pattern;
mod source_deps;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub use self::pattern::GlobResolver;
pub use self::go::GoModuleIndex;
pub use self::source_deps::{PackageIndex, PackageInfo, SourceDepsResolver};

/// A deduplicated set of absolute paths to regular files.
///
/// Iteration is always in lexicographic path order, independent of the order
/// in which files were discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedInputSet {
    files: BTreeSet<PathBuf>,
}

impl ResolvedInputSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, returning false if it was already present
    pub fn insert(&mut self, path: PathBuf) -> bool {
        self.files.insert(path)
    }

    /// Merge another set into this one
    pub fn extend(&mut self, other: ResolvedInputSet) {
        self.files.extend(other.files);
    }

    /// Whether the set contains a path
    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    /// Number of files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Iterate over the files in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(PathBuf::as_path)
    }
}

impl FromIterator<PathBuf> for ResolvedInputSet {
    fn from_iter<T: IntoIterator<Item = PathBuf>>(iter: T) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ResolvedInputSet {
    type Item = PathBuf;
    type IntoIter = std::collections::btree_set::IntoIter<PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

/// Capability shared by every input resolution strategy
pub trait InputResolver: Send + Sync {
    /// Expand the specification into concrete files
    fn resolve(&self) -> Result<ResolvedInputSet, ResolveError>;
}

/// Resolve several specifications and union the results
pub fn resolve_all(resolvers: &[&dyn InputResolver]) -> Result<ResolvedInputSet, ResolveError> {
    let mut set = ResolvedInputSet::new();
    for resolver in resolvers {
        set.extend(resolver.resolve()?);
    }
    Ok(set)
}

/// Errors while expanding input specifications
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Glob pattern could not be parsed
    #[error("Invalid input pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// A literal (non-glob) input does not exist or is not a regular file
    #[error("Input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    /// An import could not be resolved to a package
    #[error("Package '{import}' imported from {} could not be found: {reason}", from.display())]
    PackageNotFound {
        import: String,
        from: PathBuf,
        reason: String,
    },

    /// A module manifest could not be understood
    #[error("Invalid module at {}: {message}", path.display())]
    InvalidModule { path: PathBuf, message: String },

    /// Filesystem failure while enumerating inputs
    #[error("IO error resolving inputs at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
