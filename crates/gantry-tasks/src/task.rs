//! Task types and definitions

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gantry_core::config::{AppConfig, OutputConfig, TaskConfig};

/// Unique identifier for a task within the repository
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    /// Application name
    pub app: String,
    /// Task name (e.g., "build", "check")
    pub task_name: String,
}

impl TaskId {
    /// Create a new task ID
    pub fn new(app: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            task_name: task_name.into(),
        }
    }

    /// Parse a task ID from "app:task" format
    pub fn parse(s: &str) -> Option<Self> {
        let (app, task) = s.split_once(':')?;
        if app.is_empty() || task.is_empty() {
            return None;
        }
        Some(Self::new(app, task))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.app, self.task_name)
    }
}

/// Definition of a runnable task with absolute paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Task identifier
    pub id: TaskId,

    /// Application directory; commands run here and globs are relative to it
    pub dir: PathBuf,

    /// Shell command to execute
    pub command: String,

    /// Input glob patterns
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Go package directories whose transitive sources are inputs
    #[serde(default)]
    pub go_sources: Vec<PathBuf>,

    /// Environment variable names whose values are inputs
    #[serde(default)]
    pub env: Vec<String>,

    /// Literal input strings
    #[serde(default)]
    pub strings: Vec<String>,

    /// Artifacts to upload after a successful build
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,

    /// Deadline for the build command
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl TaskDefinition {
    /// Create a new task definition
    pub fn new(id: TaskId, dir: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            id,
            dir: dir.into(),
            command: command.into(),
            inputs: Vec::new(),
            go_sources: Vec::new(),
            env: Vec::new(),
            strings: Vec::new(),
            outputs: Vec::new(),
            timeout: None,
        }
    }

    /// Build a definition from configuration, anchoring paths at `root`
    pub fn from_config(root: &Path, app: &AppConfig, task: &TaskConfig) -> Self {
        let dir = root.join(&app.dir);
        Self {
            id: TaskId::new(&app.name, &task.name),
            go_sources: task.go_sources.iter().map(|p| dir.join(p)).collect(),
            dir,
            command: task.command.clone(),
            inputs: task.inputs.clone(),
            env: task.env.clone(),
            strings: task.strings.clone(),
            outputs: task.outputs.clone(),
            timeout: None,
        }
    }

    /// Add an input glob pattern
    pub fn with_input(mut self, pattern: impl Into<String>) -> Self {
        self.inputs.push(pattern.into());
        self
    }

    /// Add a Go package directory as an input root
    pub fn with_go_source(mut self, dir: impl Into<PathBuf>) -> Self {
        self.go_sources.push(dir.into());
        self
    }

    /// Add a literal input string
    pub fn with_string(mut self, value: impl Into<String>) -> Self {
        self.strings.push(value.into());
        self
    }

    /// Add an environment variable input
    pub fn with_env(mut self, name: impl Into<String>) -> Self {
        self.env.push(name.into());
        self
    }

    /// Add an output artifact
    pub fn with_output(mut self, output: OutputConfig) -> Self {
        self.outputs.push(output);
        self
    }

    /// Set the build command deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Build task definitions for every configured app, optionally limited to one app
pub fn definitions_from_config(
    root: &Path,
    config: &gantry_core::config::Config,
    only_app: Option<&str>,
) -> Vec<TaskDefinition> {
    // Zero means no deadline
    let timeout = Some(config.build.command_timeout_secs)
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);
    config
        .apps
        .iter()
        .filter(|app| only_app.map_or(true, |name| app.name == name))
        .flat_map(|app| {
            app.tasks.iter().map(move |task| TaskDefinition {
                timeout,
                ..TaskDefinition::from_config(root, app, task)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::config::Config;

    #[test]
    fn test_task_id_display() {
        let id = TaskId::new("api", "build");
        assert_eq!(id.to_string(), "api:build");
    }

    #[test]
    fn test_task_id_parse() {
        let id = TaskId::parse("api:build").unwrap();
        assert_eq!(id.app, "api");
        assert_eq!(id.task_name, "build");
    }

    #[test]
    fn test_task_id_parse_invalid() {
        assert!(TaskId::parse("nobuild").is_none());
        assert!(TaskId::parse(":build").is_none());
    }

    #[test]
    fn test_task_definition_builder() {
        let def = TaskDefinition::new(TaskId::new("api", "build"), "/repo/api", "make")
            .with_input("src/**/*.go")
            .with_env("GOFLAGS")
            .with_string("release")
            .with_timeout(Duration::from_secs(30));

        assert_eq!(def.inputs, vec!["src/**/*.go"]);
        assert_eq!(def.env, vec!["GOFLAGS"]);
        assert_eq!(def.strings, vec!["release"]);
        assert_eq!(def.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_definitions_from_config() {
        let config: Config = toml::from_str(
            r#"
[build]
command_timeout_secs = 10

[[apps]]
name = "api"
dir = "services/api"

[[apps.tasks]]
name = "build"
command = "make"
go_sources = ["cmd/api"]

[[apps]]
name = "web"
dir = "web"

[[apps.tasks]]
name = "build"
command = "npm run build"
inputs = ["src/**"]
"#,
        )
        .unwrap();

        let root = Path::new("/repo");
        let all = definitions_from_config(root, &config, None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].dir, Path::new("/repo/services/api"));
        assert_eq!(all[0].go_sources, vec![PathBuf::from("/repo/services/api/cmd/api")]);
        assert_eq!(all[0].timeout, Some(Duration::from_secs(10)));

        let web = definitions_from_config(root, &config, Some("web"));
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].id, TaskId::new("web", "build"));
    }

    #[test]
    fn test_zero_timeout_means_no_deadline() {
        let mut config = Config::default();
        config.build.command_timeout_secs = 0;
        config.apps.push(AppConfig {
            name: "api".to_string(),
            dir: "api".into(),
            tasks: vec![TaskConfig {
                name: "build".to_string(),
                command: "make".to_string(),
                inputs: vec!["src/**".to_string()],
                ..Default::default()
            }],
        });

        let defs = definitions_from_config(Path::new("/repo"), &config, None);
        assert_eq!(defs[0].timeout, None);
    }
}
