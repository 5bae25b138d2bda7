//! Glob input resolution with recursive `**` support

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace};
use walkdir::WalkDir;

use super::{InputResolver, ResolveError, ResolvedInputSet};

/// Expands glob patterns relative to a base directory.
///
/// Patterns follow shell glob rules; a `**` segment matches zero or more
/// directory levels. A pattern without any glob metacharacters names one
/// file that must exist.
#[derive(Debug, Clone)]
pub struct GlobResolver {
    base: PathBuf,
    patterns: Vec<String>,
}

impl GlobResolver {
    /// Create a resolver for patterns relative to `base`
    pub fn new(base: impl Into<PathBuf>, patterns: Vec<String>) -> Self {
        Self {
            base: base.into(),
            patterns,
        }
    }

    /// Create a resolver for a single pattern
    pub fn single(base: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self::new(base, vec![pattern.into()])
    }

    fn absolute_base(&self) -> Result<PathBuf, ResolveError> {
        if self.base.is_absolute() {
            return Ok(self.base.clone());
        }
        let cwd = std::env::current_dir().map_err(|source| ResolveError::Io {
            path: self.base.clone(),
            source,
        })?;
        Ok(cwd.join(&self.base))
    }

    #[instrument(skip(self, base, out), fields(base = %base.display()))]
    fn resolve_pattern(
        &self,
        base: &Path,
        pattern: &str,
        out: &mut ResolvedInputSet,
    ) -> Result<(), ResolveError> {
        glob::Pattern::new(pattern).map_err(|e| ResolveError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        if !is_glob(pattern) {
            return resolve_literal(&base.join(pattern), out);
        }

        let before = out.len();
        match pattern.split_once("**") {
            Some((prefix, suffix)) => {
                let suffix = suffix.trim_start_matches('/');
                let suffix = if suffix.is_empty() { "*" } else { suffix };
                let prefix = prefix.trim_end_matches('/');

                let roots = if is_glob(prefix) {
                    glob_dirs(pattern, &anchor(base, pattern, prefix)?)?
                } else if prefix.is_empty() && Path::new(pattern).is_absolute() {
                    vec![PathBuf::from("/")]
                } else if prefix.is_empty() {
                    vec![base.to_path_buf()]
                } else {
                    vec![base.join(prefix)]
                };

                let mut seen = HashSet::new();
                for root in roots {
                    for dir in walk_dirs(&root, &mut seen)? {
                        let dir = utf8(pattern, &dir)?;
                        let sub = format!("{}/{}", glob::Pattern::escape(dir), suffix);
                        glob_files(pattern, &sub, out)?;
                    }
                }
            }
            None => glob_files(pattern, &anchor(base, pattern, pattern)?, out)?,
        }

        debug!(pattern, matched = out.len() - before, "resolved glob pattern");
        Ok(())
    }
}

impl InputResolver for GlobResolver {
    fn resolve(&self) -> Result<ResolvedInputSet, ResolveError> {
        let base = self.absolute_base()?;
        let mut out = ResolvedInputSet::new();
        for pattern in &self.patterns {
            self.resolve_pattern(&base, pattern, &mut out)?;
        }
        Ok(out)
    }
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn resolve_literal(path: &Path, out: &mut ResolvedInputSet) -> Result<(), ResolveError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => {
            out.insert(path.to_path_buf());
            Ok(())
        }
        Ok(_) => Err(ResolveError::MissingInput(path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(ResolveError::MissingInput(path.to_path_buf()))
        }
        Err(source) => Err(ResolveError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Glob text for `part` of `pattern`, rooted at the escaped base directory.
///
/// Metacharacters in the base path are matched literally; only the user's
/// pattern is glob syntax. Absolute patterns are used as written.
fn anchor(base: &Path, pattern: &str, part: &str) -> Result<String, ResolveError> {
    if Path::new(pattern).is_absolute() {
        return Ok(part.to_string());
    }
    let base = utf8(pattern, base)?.trim_end_matches('/');
    Ok(format!("{}/{}", glob::Pattern::escape(base), part))
}

fn utf8<'a>(pattern: &str, path: &'a Path) -> Result<&'a str, ResolveError> {
    path.to_str().ok_or_else(|| ResolveError::InvalidPattern {
        pattern: pattern.to_string(),
        message: format!("path {} is not valid UTF-8", path.display()),
    })
}

/// Directories matched by the globbed part of a pattern before its first `**`
fn glob_dirs(pattern: &str, prefix: &str) -> Result<Vec<PathBuf>, ResolveError> {
    let mut dirs = Vec::new();
    let paths = glob::glob(prefix).map_err(|e| ResolveError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;
    for entry in paths {
        let path = entry.map_err(glob_io_error)?;
        if path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

/// Every directory below `root`, including `root` itself.
///
/// Symlinks are followed. A directory whose real path was already visited is
/// not descended into again, so symlink cycles terminate. Entries that vanish
/// or dangle are skipped; other failures are returned.
fn walk_dirs(root: &Path, seen: &mut HashSet<PathBuf>) -> Result<Vec<PathBuf>, ResolveError> {
    let mut dirs = Vec::new();
    let mut it = WalkDir::new(root).follow_links(true).into_iter();

    while let Some(entry) = it.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if err.loop_ancestor().is_some() {
                    trace!(path = ?err.path(), "skipping symlink loop");
                    continue;
                }
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                let source: io::Error = err.into();
                if source.kind() == io::ErrorKind::NotFound {
                    trace!(path = %path.display(), "skipping missing directory entry");
                    continue;
                }
                return Err(ResolveError::Io { path, source });
            }
        };

        if !entry.file_type().is_dir() {
            continue;
        }

        let real = match fs::canonicalize(entry.path()) {
            Ok(real) => real,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(source) => {
                return Err(ResolveError::Io {
                    path: entry.path().to_path_buf(),
                    source,
                })
            }
        };

        if !seen.insert(real) {
            it.skip_current_dir();
            continue;
        }
        dirs.push(entry.into_path());
    }

    Ok(dirs)
}

fn glob_files(
    pattern: &str,
    expanded: &str,
    out: &mut ResolvedInputSet,
) -> Result<(), ResolveError> {
    let paths = glob::glob(expanded).map_err(|e| ResolveError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;
    for entry in paths {
        let path = entry.map_err(glob_io_error)?;
        if path.is_file() {
            out.insert(path);
        }
    }
    Ok(())
}

fn glob_io_error(err: glob::GlobError) -> ResolveError {
    ResolveError::Io {
        path: err.path().to_path_buf(),
        source: err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, rel).unwrap();
        path
    }

    fn resolve(root: &Path, pattern: &str) -> ResolvedInputSet {
        GlobResolver::single(root, pattern).resolve().unwrap()
    }

    #[test]
    fn test_recursive_pattern_matches_nested_files() {
        let temp = TempDir::new().unwrap();
        let x = touch(temp.path(), "src/a/x.txt");
        let y = touch(temp.path(), "src/a/b/y.txt");
        touch(temp.path(), "src/README.md");

        let set = resolve(temp.path(), "src/**/*.txt");
        let expected: ResolvedInputSet = vec![x, y].into_iter().collect();
        assert_eq!(set, expected);
    }

    #[test]
    fn test_double_star_matches_zero_levels() {
        let temp = TempDir::new().unwrap();
        let top = touch(temp.path(), "src/top.txt");

        let set = resolve(temp.path(), "src/**/*.txt");
        assert!(set.contains(&top));
    }

    #[test]
    fn test_trailing_double_star_matches_all_files() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "src/a.rs");
        touch(temp.path(), "src/deep/er/b.rs");
        touch(temp.path(), "other/c.rs");

        let set = resolve(temp.path(), "src/**");
        assert_eq!(set.len(), 2);
        assert!(set.iter().all(|p| p.starts_with(temp.path().join("src"))));
    }

    #[test]
    fn test_directories_are_never_returned() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "src/a/file");
        fs::create_dir_all(temp.path().join("src/empty")).unwrap();

        let set = resolve(temp.path(), "src/*");
        assert!(set.is_empty());

        let set = resolve(temp.path(), "src/**/*");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let temp = TempDir::new().unwrap();
        assert!(resolve(temp.path(), "missing/**/*.txt").is_empty());
        assert!(resolve(temp.path(), "*.nothing").is_empty());
    }

    #[test]
    fn test_literal_input_must_exist() {
        let temp = TempDir::new().unwrap();
        let file = touch(temp.path(), "go.mod");

        assert!(resolve(temp.path(), "go.mod").contains(&file));

        let err = GlobResolver::single(temp.path(), "Cargo.toml")
            .resolve()
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingInput(_)));
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        let temp = TempDir::new().unwrap();
        let err = GlobResolver::single(temp.path(), "src/[a")
            .resolve()
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidPattern { .. }));
    }

    #[test]
    fn test_glob_in_prefix() {
        let temp = TempDir::new().unwrap();
        let a = touch(temp.path(), "pkg/one/src/deep/a.go");
        let b = touch(temp.path(), "pkg/two/src/b.go");
        touch(temp.path(), "pkg/two/other/c.go");

        let set = resolve(temp.path(), "pkg/*/src/**/*.go");
        let expected: ResolvedInputSet = vec![a, b].into_iter().collect();
        assert_eq!(set, expected);
    }

    #[test]
    fn test_multiple_patterns_are_unioned() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "src/a.rs");
        touch(temp.path(), "Cargo.toml");

        let resolver = GlobResolver::new(
            temp.path(),
            vec![
                "src/**/*.rs".to_string(),
                "Cargo.toml".to_string(),
                "src/*.rs".to_string(),
            ],
        );
        assert_eq!(resolver.resolve().unwrap().len(), 2);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let temp = TempDir::new().unwrap();
        for rel in ["a/1.txt", "b/c/2.txt", "b/3.txt", "d/e/f/4.txt"] {
            touch(temp.path(), rel);
        }

        let first = resolve(temp.path(), "**/*.txt");
        let second = resolve(temp.path(), "**/*.txt");
        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
    }

    #[test]
    fn test_metacharacters_in_base_are_literal() {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("proj[1]").join("api");
        let x = touch(&app, "src/a/x.txt");
        let top = touch(&app, "src/top.txt");
        let lib = touch(&app, "pkg/lib/src/l.txt");
        touch(&app, "src/README.md");

        let recursive = resolve(&app, "src/**/*.txt");
        let expected: ResolvedInputSet = vec![x, top.clone()].into_iter().collect();
        assert_eq!(recursive, expected);

        let flat = resolve(&app, "src/*.txt");
        assert_eq!(flat.len(), 1);
        assert!(flat.contains(&top));

        assert!(resolve(&app, "pkg/*/src/**").contains(&lib));
        assert!(resolve(&app, "src/top.txt").contains(&top));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_terminates() {
        let temp = TempDir::new().unwrap();
        let file = touch(temp.path(), "src/a/x.txt");
        std::os::unix::fs::symlink(temp.path().join("src"), temp.path().join("src/a/loop"))
            .unwrap();

        let set = resolve(temp.path(), "src/**/*.txt");
        assert_eq!(set.len(), 1);
        assert!(set.contains(&file));
    }
}
