//! Artifact upload jobs and the sinks that carry them out

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use gantry_core::config::OutputConfig;

/// Kind of artifact upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadKind {
    /// File to object storage
    S3,
    /// Container image to a registry
    Docker,
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S3 => write!(f, "s3"),
            Self::Docker => write!(f, "docker"),
        }
    }
}

impl From<&OutputConfig> for UploadKind {
    fn from(output: &OutputConfig) -> Self {
        match output {
            OutputConfig::File { .. } => Self::S3,
            OutputConfig::DockerImage { .. } => Self::Docker,
        }
    }
}

/// Upload errors
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The sink rejected or failed the upload
    #[error("Upload to {destination} failed: {message}")]
    Failed {
        destination: String,
        message: String,
    },

    /// No sink is configured for this kind of upload
    #[error("No artifact sink configured for {0} uploads")]
    NoSink(UploadKind),

    /// A local artifact could not be read
    #[error("Cannot read artifact {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Destination for artifacts of one kind
pub trait ArtifactSink: Send + Sync {
    /// Sink name for logs
    fn name(&self) -> &str;

    /// Upload `source` to `destination`, returning the final URL
    fn upload(&self, source: &str, destination: &str) -> Result<String, UploadError>;
}

/// Sink that copies files below a local directory
#[derive(Debug, Clone)]
pub struct FilesystemSink {
    root: PathBuf,
}

impl FilesystemSink {
    /// Create a sink writing below `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArtifactSink for FilesystemSink {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn upload(&self, source: &str, destination: &str) -> Result<String, UploadError> {
        let relative = destination.trim_start_matches('/');
        if relative.split('/').any(|part| part == "..") {
            return Err(UploadError::Failed {
                destination: destination.to_string(),
                message: "destination must stay inside the artifact directory".to_string(),
            });
        }

        let target = self.root.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| UploadError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::copy(source, &target).map_err(|source_err| UploadError::Io {
            path: PathBuf::from(source),
            source: source_err,
        })?;

        debug!(source, target = %target.display(), "artifact copied");
        Ok(format!("file://{}", target.display()))
    }
}

/// Sinks per upload kind
#[derive(Clone, Default)]
pub struct Uploaders {
    s3: Option<Arc<dyn ArtifactSink>>,
    docker: Option<Arc<dyn ArtifactSink>>,
}

impl Uploaders {
    /// No sinks configured
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sink for file uploads
    pub fn with_s3(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.s3 = Some(sink);
        self
    }

    /// Set the sink for image uploads
    pub fn with_docker(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.docker = Some(sink);
        self
    }

    /// Sink for a kind of upload
    pub fn sink(&self, kind: UploadKind) -> Result<&Arc<dyn ArtifactSink>, UploadError> {
        match kind {
            UploadKind::S3 => self.s3.as_ref(),
            UploadKind::Docker => self.docker.as_ref(),
        }
        .ok_or(UploadError::NoSink(kind))
    }
}

impl fmt::Debug for Uploaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uploaders")
            .field("s3", &self.s3.as_ref().map(|s| s.name().to_string()))
            .field("docker", &self.docker.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

/// Upload of a file to object storage
#[derive(Debug, Clone)]
pub struct S3Job<T> {
    /// Local file
    pub file: PathBuf,
    /// Bucket key or URL
    pub destination: String,
    /// Caller data
    pub user_data: T,
}

/// Push of a container image to a registry
#[derive(Debug, Clone)]
pub struct DockerJob<T> {
    /// Local image ID
    pub image_id: String,
    /// Repository and tag
    pub destination: String,
    /// Caller data
    pub user_data: T,
}

/// An artifact upload, one variant per kind
#[derive(Debug, Clone)]
pub enum UploadJob<T> {
    /// File upload
    S3(S3Job<T>),
    /// Image upload
    Docker(DockerJob<T>),
}

impl<T> UploadJob<T> {
    /// Create the upload for a declared task output.
    ///
    /// Image outputs read the image ID from their ID file, so this must run
    /// after the build that writes it.
    pub fn from_output(
        output: &OutputConfig,
        app_dir: &Path,
        user_data: T,
    ) -> Result<Self, UploadError> {
        match output {
            OutputConfig::File { path, destination } => Ok(Self::S3(S3Job {
                file: app_dir.join(path),
                destination: destination.clone(),
                user_data,
            })),
            OutputConfig::DockerImage {
                id_file,
                destination,
            } => {
                let id_path = app_dir.join(id_file);
                let image_id = fs::read_to_string(&id_path)
                    .map_err(|source| UploadError::Io {
                        path: id_path,
                        source,
                    })?
                    .trim()
                    .to_string();
                Ok(Self::Docker(DockerJob {
                    image_id,
                    destination: destination.clone(),
                    user_data,
                }))
            }
        }
    }

    /// Kind tag
    pub fn kind(&self) -> UploadKind {
        match self {
            Self::S3(_) => UploadKind::S3,
            Self::Docker(_) => UploadKind::Docker,
        }
    }

    /// Local file path or image ID
    pub fn source(&self) -> String {
        match self {
            Self::S3(job) => job.file.to_string_lossy().into_owned(),
            Self::Docker(job) => job.image_id.clone(),
        }
    }

    /// Destination locator
    pub fn destination(&self) -> &str {
        match self {
            Self::S3(job) => &job.destination,
            Self::Docker(job) => &job.destination,
        }
    }

    /// Caller data
    pub fn user_data(&self) -> &T {
        match self {
            Self::S3(job) => &job.user_data,
            Self::Docker(job) => &job.user_data,
        }
    }

    fn into_user_data(self) -> T {
        match self {
            Self::S3(job) => job.user_data,
            Self::Docker(job) => job.user_data,
        }
    }

    /// Perform the upload once with the matching sink
    pub fn run(self, uploaders: &Uploaders) -> UploadResult<T> {
        let kind = self.kind();
        let source = self.source();
        let destination = self.destination().to_string();
        let started_at = Utc::now();

        let outcome = uploaders
            .sink(kind)
            .and_then(|sink| sink.upload(&source, &destination));
        match &outcome {
            Ok(url) => info!(%kind, %source, %url, "artifact uploaded"),
            Err(e) => debug!(%kind, %source, error = %e, "artifact upload failed"),
        }

        UploadResult {
            kind,
            source,
            destination,
            started_at,
            stopped_at: Utc::now(),
            outcome,
            user_data: self.into_user_data(),
        }
    }
}

/// Outcome of one upload job
#[derive(Debug)]
pub struct UploadResult<T> {
    /// Kind tag
    pub kind: UploadKind,
    /// Local file path or image ID
    pub source: String,
    /// Destination locator
    pub destination: String,
    /// When the upload started
    pub started_at: DateTime<Utc>,
    /// When the upload finished
    pub stopped_at: DateTime<Utc>,
    /// Final URL, or why the upload failed
    pub outcome: Result<String, UploadError>,
    /// Caller data from the job
    pub user_data: T,
}
