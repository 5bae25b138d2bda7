//! Configuration types

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Build execution settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Applications and their tasks
    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

impl Config {
    /// Look up an application by name
    pub fn app(&self, name: &str) -> Option<&AppConfig> {
        self.apps.iter().find(|a| a.name == name)
    }

    /// Number of configured tasks across all apps
    pub fn task_count(&self) -> usize {
        self.apps.iter().map(|a| a.tasks.len()).sum()
    }
}

/// Build execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Number of worker threads executing build and upload jobs
    pub concurrency: usize,

    /// Run-history file (JSON lines), relative to the repository root
    pub history: PathBuf,

    /// Destination root for the filesystem artifact sink
    pub artifacts: PathBuf,

    /// Deadline for a single build command, in seconds
    pub command_timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            history: PathBuf::from(".gantry").join("history.jsonl"),
            artifacts: PathBuf::from(".gantry").join("artifacts"),
            command_timeout_secs: 3600,
        }
    }
}

/// An application in the repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name
    pub name: String,

    /// Application directory, relative to the repository root
    pub dir: PathBuf,

    /// Tasks defined for this application
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// A task of an application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Task name (e.g., "build", "check")
    pub name: String,

    /// Shell command to execute
    pub command: String,

    /// Input glob patterns, relative to the application directory
    pub inputs: Vec<String>,

    /// Go package directories whose transitive sources are inputs
    pub go_sources: Vec<PathBuf>,

    /// Environment variables whose values are inputs
    pub env: Vec<String>,

    /// Literal strings that are inputs
    pub strings: Vec<String>,

    /// Artifacts produced by the task
    pub outputs: Vec<OutputConfig>,
}

/// An artifact produced by a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputConfig {
    /// A file uploaded to object storage
    File {
        /// Path relative to the application directory
        path: PathBuf,
        /// Object key or path at the destination
        destination: String,
    },
    /// A container image pushed to a registry
    DockerImage {
        /// File containing the image ID, written by the build command
        id_file: PathBuf,
        /// Registry repository and tag
        destination: String,
    },
}

impl OutputConfig {
    /// Destination locator
    pub fn destination(&self) -> &str {
        match self {
            Self::File { destination, .. } | Self::DockerImage { destination, .. } => destination,
        }
    }
}
