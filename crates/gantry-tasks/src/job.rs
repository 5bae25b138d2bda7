//! Jobs executed on the worker pool and the shell commands behind build jobs

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// What a finished job action produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutput {
    /// Exit code, for process-shaped jobs
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr
    pub output: String,
}

impl JobOutput {
    /// Output of a job that is not a process
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            exit_code: None,
            output: output.into(),
        }
    }
}

/// Why a job action could not complete
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The process could not be started
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on or reading from the process failed
    #[error("IO error while running job: {0}")]
    Io(#[from] std::io::Error),

    /// The job exceeded its deadline
    #[error("Job timed out after {0:?}")]
    Timeout(Duration),
}

type Action = Box<dyn FnOnce() -> Result<JobOutput, JobError> + Send + 'static>;

/// A unit of work plus caller data carried through to its result
pub struct Job<T> {
    action: Action,
    /// Caller data, returned untouched in the [`JobResult`]
    pub user_data: T,
}

impl<T> Job<T> {
    /// Wrap an action
    pub fn new<F>(user_data: T, action: F) -> Self
    where
        F: FnOnce() -> Result<JobOutput, JobError> + Send + 'static,
    {
        Self {
            action: Box::new(action),
            user_data,
        }
    }

    /// Run the action to completion on the current thread
    pub fn run(self) -> JobResult<T> {
        let started_at = Utc::now();
        let outcome = (self.action)();
        let stopped_at = Utc::now();

        let (error, exit_code, output) = match outcome {
            Ok(out) => (None, out.exit_code, out.output),
            Err(e) => (Some(e), None, String::new()),
        };

        JobResult {
            user_data: self.user_data,
            error,
            started_at,
            stopped_at,
            exit_code,
            output,
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("user_data", &self.user_data)
            .finish_non_exhaustive()
    }
}

/// Outcome of one job
#[derive(Debug)]
pub struct JobResult<T> {
    /// Caller data from the [`Job`]
    pub user_data: T,
    /// Set when the action itself failed
    pub error: Option<JobError>,
    /// When the action started
    pub started_at: DateTime<Utc>,
    /// When the action returned
    pub stopped_at: DateTime<Utc>,
    /// Exit code, for process-shaped jobs
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr
    pub output: String,
}

impl<T> JobResult<T> {
    /// Wall-clock run time
    pub fn duration(&self) -> Duration {
        (self.stopped_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// No error and, for processes, a zero exit code
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.exit_code.map_or(true, |code| code == 0)
    }
}

/// A shell command run as a build job
#[derive(Debug, Clone)]
pub struct ShellCommand {
    /// Command line passed to `sh -c`
    pub command: String,
    /// Working directory
    pub dir: PathBuf,
    /// Deadline; the process is killed when it is exceeded
    pub timeout: Option<Duration>,
}

impl ShellCommand {
    /// Create a command running in `dir`
    pub fn new(command: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            dir: dir.into(),
            timeout: None,
        }
    }

    /// Set the deadline
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run to completion, calling `on_line` for every output line.
    ///
    /// A non-zero exit status is not an error; it is reported in
    /// [`JobOutput::exit_code`].
    pub fn run(&self, on_line: &(dyn Fn(&str, bool) + Sync)) -> Result<JobOutput, JobError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        runtime.block_on(async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, self.run_async(on_line))
                    .await
                    .map_err(|_| JobError::Timeout(limit))?,
                None => self.run_async(on_line).await,
            }
        })
    }

    async fn run_async(
        &self,
        on_line: &(dyn Fn(&str, bool) + Sync),
    ) -> Result<JobOutput, JobError> {
        debug!(command = %self.command, dir = %self.dir.display(), "spawning command");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| JobError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let mut lines = Vec::new();

        if let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) {
            let mut stdout = BufReader::new(stdout).lines();
            let mut stderr = BufReader::new(stderr).lines();
            let (mut stdout_open, mut stderr_open) = (true, true);

            while stdout_open || stderr_open {
                tokio::select! {
                    line = stdout.next_line(), if stdout_open => match line? {
                        Some(line) => {
                            on_line(&line, false);
                            lines.push(line);
                        }
                        None => stdout_open = false,
                    },
                    line = stderr.next_line(), if stderr_open => match line? {
                        Some(line) => {
                            on_line(&line, true);
                            lines.push(line);
                        }
                        None => stderr_open = false,
                    },
                }
            }
        }

        let status = child.wait().await?;
        debug!(command = %self.command, code = ?status.code(), "command finished");

        Ok(JobOutput {
            exit_code: Some(status.code().unwrap_or(-1)),
            output: lines.join("\n"),
        })
    }
}
