//! Task fingerprints: one digest over all resolved inputs

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tracing::{debug, instrument};

use gantry_core::{digest_file, Digest, InputError};

use crate::inputs::{ResolveError, ResolvedInputSet};

/// Why a task could not be fingerprinted
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// Input specifications could not be expanded
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A resolved input could not be read
    #[error(transparent)]
    Input(#[from] InputError),
}

/// One input file with its content digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    /// Path relative to the repository root, `/`-separated
    pub path: String,
    /// Digest of the file content
    pub digest: Digest,
}

/// The combined digest of a task's inputs, plus the per-file digests it was
/// computed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Total input digest
    pub digest: Digest,
    /// Input files in the order they were folded
    pub files: Vec<InputFile>,
}

/// Folds per-file digests into a task fingerprint.
///
/// Paths are made relative to the repository root before hashing, so the
/// same checkout in two locations yields the same fingerprint.
#[derive(Debug, Clone)]
pub struct InputDigester {
    root: PathBuf,
}

impl InputDigester {
    /// Create a digester for inputs below `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path as recorded and hashed: relative to the root when possible
    pub fn relative_path(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Combine the digests of `inputs` and the `extras` into one fingerprint.
    ///
    /// Files are folded in sorted path order: for each, its digest and then its
    /// path. Extras follow in the given order.
    #[instrument(skip_all, fields(files = inputs.len(), extras = extras.len()))]
    pub fn combine<B: AsRef<[u8]>>(
        &self,
        inputs: &ResolvedInputSet,
        extras: &[B],
    ) -> Result<Fingerprint, InputError> {
        let mut keyed: Vec<(String, &Path)> = inputs
            .iter()
            .map(|path| (self.relative_path(path), path))
            .collect();
        keyed.sort();

        let mut hasher = Sha256::new();
        let mut files = Vec::with_capacity(keyed.len());
        for (key, path) in keyed {
            let digest = digest_file(path)?;
            hasher.update(digest.to_string().as_bytes());
            hasher.update(b"\0");
            hasher.update(key.as_bytes());
            hasher.update(b"\0");
            files.push(InputFile { path: key, digest });
        }

        for extra in extras {
            hasher.update(extra.as_ref());
            hasher.update(b"\0");
        }

        let digest = Digest::from_sha256(hasher);
        debug!(fingerprint = %digest, "computed task fingerprint");
        Ok(Fingerprint { digest, files })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const NO_EXTRAS: &[&str] = &[];

    fn setup() -> (TempDir, Vec<PathBuf>) {
        let temp = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for (rel, content) in [("a.txt", "alpha"), ("sub/b.txt", "beta"), ("c.txt", "gamma")] {
            let path = temp.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            paths.push(path);
        }
        (temp, paths)
    }

    #[test]
    fn test_order_independent() {
        let (temp, paths) = setup();
        let digester = InputDigester::new(temp.path());

        let forward: ResolvedInputSet = paths.iter().cloned().collect();
        let backward: ResolvedInputSet = paths.iter().rev().cloned().collect();

        assert_eq!(
            digester.combine(&forward, NO_EXTRAS).unwrap().digest,
            digester.combine(&backward, NO_EXTRAS).unwrap().digest
        );
    }

    #[test]
    fn test_content_change_changes_fingerprint() {
        let (temp, paths) = setup();
        let digester = InputDigester::new(temp.path());
        let set: ResolvedInputSet = paths.iter().cloned().collect();

        let before = digester.combine(&set, NO_EXTRAS).unwrap();
        fs::write(&paths[1], "betb").unwrap();
        let after = digester.combine(&set, NO_EXTRAS).unwrap();

        assert_ne!(before.digest, after.digest);
    }

    #[test]
    fn test_rename_changes_fingerprint() {
        let (temp, paths) = setup();
        let digester = InputDigester::new(temp.path());
        let set: ResolvedInputSet = paths.iter().cloned().collect();
        let before = digester.combine(&set, NO_EXTRAS).unwrap();

        let renamed = temp.path().join("renamed.txt");
        fs::rename(&paths[0], &renamed).unwrap();
        let set: ResolvedInputSet = vec![renamed, paths[1].clone(), paths[2].clone()]
            .into_iter()
            .collect();
        let after = digester.combine(&set, NO_EXTRAS).unwrap();

        assert_ne!(before.digest, after.digest);
    }

    #[test]
    fn test_extras_are_folded() {
        let (temp, paths) = setup();
        let digester = InputDigester::new(temp.path());
        let set: ResolvedInputSet = paths.into_iter().collect();

        let plain = digester.combine(&set, NO_EXTRAS).unwrap();
        let with_env = digester.combine(&set, &["GOOS=linux"]).unwrap();
        let other_env = digester.combine(&set, &["GOOS=darwin"]).unwrap();

        assert_ne!(plain.digest, with_env.digest);
        assert_ne!(with_env.digest, other_env.digest);
    }

    #[test]
    fn test_same_tree_in_two_locations_matches() {
        let (first, first_paths) = setup();
        let (second, second_paths) = setup();

        let a = InputDigester::new(first.path())
            .combine(&first_paths.into_iter().collect(), NO_EXTRAS)
            .unwrap();
        let b = InputDigester::new(second.path())
            .combine(&second_paths.into_iter().collect(), NO_EXTRAS)
            .unwrap();

        assert_eq!(a.digest, b.digest);
        assert_eq!(a.files[0].path, "a.txt");
        assert_eq!(a.files[2].path, "sub/b.txt");
    }

    #[test]
    fn test_unreadable_input_fails() {
        let (temp, mut paths) = setup();
        paths.push(temp.path().join("gone.txt"));
        let set: ResolvedInputSet = paths.into_iter().collect();

        let err = InputDigester::new(temp.path())
            .combine(&set, NO_EXTRAS)
            .unwrap_err();
        assert!(err.to_string().contains("gone.txt"));
    }

    #[test]
    fn test_empty_set_has_stable_fingerprint() {
        let digester = InputDigester::new("/repo");
        let a = digester.combine(&ResolvedInputSet::new(), NO_EXTRAS).unwrap();
        let b = digester.combine(&ResolvedInputSet::new(), NO_EXTRAS).unwrap();
        assert_eq!(a, b);
        assert!(a.files.is_empty());
    }
}
