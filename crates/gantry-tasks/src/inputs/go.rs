//! Package index for Go module trees

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use tracing::debug;

use super::source_deps::{PackageIndex, PackageInfo};
use super::ResolveError;

const GO_MOD: &str = "go.mod";

/// Indexes the packages of one Go module.
///
/// Packages inside the module resolve to directories below the module root,
/// third-party packages resolve through `vendor/`. Import paths whose first
/// element contains no `.` belong to the standard library. `_test.go` files
/// are not part of a package.
#[derive(Debug, Clone)]
pub struct GoModuleIndex {
    root: PathBuf,
    module_path: String,
    import_block: Regex,
    import_spec: Regex,
    import_single: Regex,
}

impl GoModuleIndex {
    /// Open the module containing `dir` by searching upwards for `go.mod`
    pub fn open(dir: &Path) -> Result<Self, ResolveError> {
        let mut current = normalize(dir);
        loop {
            let go_mod = current.join(GO_MOD);
            if go_mod.is_file() {
                return Self::from_go_mod(&go_mod);
            }
            if !current.pop() {
                return Err(ResolveError::MissingInput(dir.join(GO_MOD)));
            }
        }
    }

    fn from_go_mod(go_mod: &Path) -> Result<Self, ResolveError> {
        let content = fs::read_to_string(go_mod).map_err(|source| ResolveError::Io {
            path: go_mod.to_path_buf(),
            source,
        })?;

        let module_re = build_regex(go_mod, r"(?m)^\s*module\s+(\S+)")?;
        let module_path = module_re
            .captures(&content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim_matches('"').to_string())
            .ok_or_else(|| ResolveError::InvalidModule {
                path: go_mod.to_path_buf(),
                message: "no module directive".to_string(),
            })?;

        let root = go_mod
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        debug!(module = %module_path, root = %root.display(), "opened go module");

        Ok(Self {
            root,
            module_path,
            // gofmt puts the closing paren of an import block on its own line
            import_block: build_regex(go_mod, r"(?ms)\bimport\s*\((.*?)^\s*\)")?,
            import_spec: build_regex(go_mod, r#"(?m)^\s*(?:[\w.]+\s+)?"([^"]+)""#)?,
            import_single: build_regex(go_mod, r#"(?m)^\s*import\s+(?:[\w.]+\s+)?"([^"]+)""#)?,
        })
    }

    /// Module path declared in `go.mod`
    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    /// Module root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_module_import(&self, import: &str) -> bool {
        import == self.module_path
            || import
                .strip_prefix(&self.module_path)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    fn is_standard(&self, import: &str) -> bool {
        !self.is_module_import(import)
            && !import
                .split('/')
                .next()
                .is_some_and(|first| first.contains('.'))
    }

    fn dir_for_import(&self, import: &str) -> Option<PathBuf> {
        if self.is_module_import(import) {
            let rest = import[self.module_path.len()..].trim_start_matches('/');
            return Some(join_slash_path(&self.root, rest));
        }
        let vendored = join_slash_path(&self.root.join("vendor"), import);
        vendored.is_dir().then_some(vendored)
    }

    fn import_path_for_dir(&self, dir: &Path) -> Option<String> {
        let rel = dir.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        match parts.split_first() {
            None => Some(self.module_path.clone()),
            Some((first, rest)) if first == "vendor" && !rest.is_empty() => Some(rest.join("/")),
            Some(_) => Some(format!("{}/{}", self.module_path, parts.join("/"))),
        }
    }

    fn load(
        &self,
        import_path: String,
        dir: PathBuf,
        from: &Path,
    ) -> Result<PackageInfo, ResolveError> {
        let not_found = |reason: &str| ResolveError::PackageNotFound {
            import: import_path.clone(),
            from: from.to_path_buf(),
            reason: reason.to_string(),
        };

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(not_found("package directory does not exist"))
            }
            Err(source) => return Err(ResolveError::Io { path: dir, source }),
        };

        let mut source_files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ResolveError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".go") && !name.ends_with("_test.go") && path.is_file() {
                source_files.push(path);
            }
        }
        if source_files.is_empty() {
            return Err(not_found("no Go source files"));
        }
        source_files.sort();

        let mut imports = BTreeSet::new();
        for file in &source_files {
            let content = fs::read_to_string(file).map_err(|source| ResolveError::Io {
                path: file.clone(),
                source,
            })?;
            imports.extend(self.parse_imports(&content));
        }

        Ok(PackageInfo {
            import_path,
            dir,
            source_files,
            imports: imports.into_iter().collect(),
            is_standard_library: false,
        })
    }

    /// Import paths declared in one Go source file
    pub fn parse_imports(&self, content: &str) -> Vec<String> {
        let mut imports = Vec::new();
        for block in self.import_block.captures_iter(content) {
            if let Some(body) = block.get(1) {
                imports.extend(
                    self.import_spec
                        .captures_iter(body.as_str())
                        .filter_map(|c| c.get(1))
                        .map(|m| m.as_str().to_string()),
                );
            }
        }
        imports.extend(
            self.import_single
                .captures_iter(content)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
        );
        imports
    }
}

impl PackageIndex for GoModuleIndex {
    fn find_package(&self, import: &str, from_dir: &Path) -> Result<PackageInfo, ResolveError> {
        if import == "." || import.starts_with("./") || import.starts_with("../") {
            let dir = normalize(&from_dir.join(import));
            let import_path =
                self.import_path_for_dir(&dir)
                    .ok_or_else(|| ResolveError::PackageNotFound {
                        import: import.to_string(),
                        from: from_dir.to_path_buf(),
                        reason: format!("directory is outside module {}", self.module_path),
                    })?;
            return self.load(import_path, dir, from_dir);
        }

        if self.is_standard(import) {
            return Ok(PackageInfo::standard(import));
        }

        let dir = self
            .dir_for_import(import)
            .ok_or_else(|| ResolveError::PackageNotFound {
                import: import.to_string(),
                from: from_dir.to_path_buf(),
                reason: "not in module and not vendored".to_string(),
            })?;
        self.load(import.to_string(), dir, from_dir)
    }

    fn is_interop_import(&self, import: &str) -> bool {
        import == "C"
    }
}

fn build_regex(go_mod: &Path, pattern: &str) -> Result<Regex, ResolveError> {
    Regex::new(pattern).map_err(|e| ResolveError::InvalidModule {
        path: go_mod.to_path_buf(),
        message: e.to_string(),
    })
}

fn join_slash_path(base: &Path, slash_path: &str) -> PathBuf {
    slash_path
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(base.to_path_buf(), |acc, part| acc.join(part))
}

/// Lexically remove `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
