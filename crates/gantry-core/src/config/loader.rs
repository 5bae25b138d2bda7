//! Configuration discovery and parsing

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result};

use super::defaults::config_file_names;
use super::types::Config;
use super::validation::validate_config;

/// Serialization format of a configuration file, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
}

impl ConfigFormat {
    /// `.toml` is TOML, anything else is read as YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }

    /// Deserialize and validate a configuration document
    pub fn parse(self, content: &str) -> Result<Config> {
        let config: Config = match self {
            Self::Toml => toml::from_str(content).map_err(ConfigError::from)?,
            Self::Yaml => serde_yaml::from_str(content).map_err(ConfigError::from)?,
        };
        validate_config(&config)?;
        Ok(config)
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Toml => "toml",
            Self::Yaml => "yaml",
        })
    }
}

/// Read, parse and validate one configuration file
pub fn load_config(path: &Path) -> Result<Config> {
    let format = ConfigFormat::from_path(path);
    info!(path = %path.display(), %format, "loading config");

    let content = std::fs::read_to_string(path).map_err(ConfigError::from)?;
    let config = format.parse(&content)?;
    debug!(apps = config.apps.len(), tasks = config.task_count(), "config validated");
    Ok(config)
}

/// Nearest configuration file at or above `start_dir`.
///
/// Within one directory the names of [`config_file_names`] are tried in order.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let found = start_dir.ancestors().find_map(|dir| {
        config_file_names()
            .into_iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    });
    match &found {
        Some(path) => debug!(path = %path.display(), "found config file"),
        None => debug!(start_dir = %start_dir.display(), "no config file found"),
    }
    found
}

/// Discover and load the configuration governing `dir`
pub fn load_config_from_dir(dir: &Path) -> Result<(Config, PathBuf)> {
    let path = find_config(dir).ok_or_else(|| ConfigError::NotFound(dir.to_path_buf()))?;
    Ok((load_config(&path)?, path))
}

/// Like [`load_config_from_dir`], falling back to an empty configuration
pub fn load_config_or_default(dir: &Path) -> (Config, Option<PathBuf>) {
    load_config_from_dir(dir)
        .map(|(config, path)| (config, Some(path)))
        .unwrap_or_else(|e| {
            warn!(dir = %dir.display(), error = %e, "no usable config, using defaults");
            (Config::default(), None)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::DEFAULT_CONFIG_TEMPLATE;
    use crate::config::types::OutputConfig;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[build]
concurrency = 2

[[apps]]
name = "api"
dir = "services/api"

[[apps.tasks]]
name = "build"
command = "make dist"
inputs = ["src/**/*.go", "go.mod"]
env = ["GOFLAGS"]

[[apps.tasks.outputs]]
type = "file"
path = "dist/api.tar.gz"
destination = "releases/api.tar.gz"

[[apps.tasks.outputs]]
type = "docker_image"
id_file = "dist/image.id"
destination = "registry.example.com/api:latest"
"#;

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.toml");
        std::fs::write(&config_path, SAMPLE).unwrap();
        let nested = temp.path().join("services").join("api");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config(&nested), Some(config_path));
    }

    #[test]
    fn test_nearest_directory_wins() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("gantry.toml"), SAMPLE).unwrap();
        let app = temp.path().join("services");
        std::fs::create_dir_all(&app).unwrap();
        let local = app.join(".gantry.yaml");
        std::fs::write(&local, "apps: []\n").unwrap();

        assert_eq!(find_config(&app).unwrap(), local);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("gantry.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new(".gantry.yaml")), ConfigFormat::Yaml);
        assert!(ConfigFormat::Toml.parse("[build]\nconcurrency = 0\n").is_err());
    }

    #[test]
    fn test_toml_document() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.toml");
        std::fs::write(&config_path, SAMPLE).unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.build.concurrency, 2);
        assert_eq!(config.build.command_timeout_secs, 3600);
        assert_eq!(config.task_count(), 1);

        let task = &config.app("api").unwrap().tasks[0];
        assert_eq!(task.env, vec!["GOFLAGS"]);
        assert_eq!(task.outputs.len(), 2);
        assert!(matches!(task.outputs[1], OutputConfig::DockerImage { .. }));
    }

    #[test]
    fn test_yaml_document() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.yaml");
        std::fs::write(
            &config_path,
            "apps:\n  - name: web\n    dir: web\n    tasks:\n      - name: build\n        command: npm run build\n        inputs: [\"src/**\"]\n",
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.apps[0].tasks[0].command, "npm run build");
    }

    #[test]
    fn test_template_is_valid() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_or_default_without_file() {
        let temp = TempDir::new().unwrap();
        let (config, path) = load_config_or_default(temp.path());
        assert!(path.is_none());
        assert!(config.apps.is_empty());
    }
}
