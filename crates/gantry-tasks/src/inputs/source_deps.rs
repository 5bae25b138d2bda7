//! Transitive source-dependency resolution

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace};

use super::{InputResolver, ResolveError, ResolvedInputSet};

/// A source package as described by a [`PackageIndex`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    /// Canonical import path; identifies the package
    pub import_path: String,
    /// Directory holding the package sources
    pub dir: PathBuf,
    /// Absolute paths of the package's source files
    pub source_files: Vec<PathBuf>,
    /// Import names referenced by the package
    pub imports: Vec<String>,
    /// Whether the package ships with the language distribution
    pub is_standard_library: bool,
}

impl PackageInfo {
    /// Describe a standard-library package, which carries no files
    pub fn standard(import_path: impl Into<String>) -> Self {
        Self {
            import_path: import_path.into(),
            dir: PathBuf::new(),
            source_files: Vec::new(),
            imports: Vec::new(),
            is_standard_library: true,
        }
    }
}

/// Looks up packages of one language ecosystem
pub trait PackageIndex: Send + Sync {
    /// Find the package an import name refers to, as seen from `from_dir`.
    ///
    /// The name `"."` refers to the package in `from_dir` itself.
    fn find_package(&self, import: &str, from_dir: &Path) -> Result<PackageInfo, ResolveError>;

    /// Whether an import is an interop pseudo-package that has no sources
    fn is_interop_import(&self, _import: &str) -> bool {
        false
    }
}

/// Resolves the source files of a set of root packages and everything they
/// import, excluding the standard library.
///
/// The import graph is walked depth-first with an explicit stack; each package
/// is expanded once, so diamonds and cycles are safe. Any import that cannot be
/// found fails the whole resolution.
#[derive(Debug, Clone)]
pub struct SourceDepsResolver<I> {
    index: I,
    roots: Vec<PathBuf>,
}

impl<I: PackageIndex> SourceDepsResolver<I> {
    /// Create a resolver for the packages in `roots`
    pub fn new(index: I, roots: Vec<PathBuf>) -> Self {
        Self { index, roots }
    }

    /// The package index in use
    pub fn index(&self) -> &I {
        &self.index
    }
}

impl<I: PackageIndex> InputResolver for SourceDepsResolver<I> {
    #[instrument(skip(self), fields(roots = self.roots.len()))]
    fn resolve(&self) -> Result<ResolvedInputSet, ResolveError> {
        let mut out = ResolvedInputSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut standard: HashSet<String> = HashSet::new();
        let mut stack: Vec<PackageInfo> = Vec::new();

        for root in &self.roots {
            let pkg = self.index.find_package(".", root)?;
            if !pkg.is_standard_library {
                stack.push(pkg);
            }
        }

        while let Some(pkg) = stack.pop() {
            if !visited.insert(pkg.import_path.clone()) {
                continue;
            }
            trace!(package = %pkg.import_path, files = pkg.source_files.len(), "expanding package");
            out.extend(pkg.source_files.iter().cloned().collect());

            for import in &pkg.imports {
                if self.index.is_interop_import(import)
                    || visited.contains(import)
                    || standard.contains(import)
                {
                    continue;
                }
                let dep = self.index.find_package(import, &pkg.dir)?;
                if dep.is_standard_library {
                    standard.insert(import.clone());
                    continue;
                }
                stack.push(dep);
            }
        }

        debug!(
            packages = visited.len(),
            files = out.len(),
            "resolved source dependencies"
        );
        Ok(out)
    }
}
