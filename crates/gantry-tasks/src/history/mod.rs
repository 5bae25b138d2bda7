//! Run history: recorded task runs and the queries over them

mod query;
mod store;

pub use query::*;
pub use store::*;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gantry_core::Digest;

use crate::fingerprint::InputFile;
use crate::task::TaskId;
use crate::upload::UploadKind;

/// Outcome stored with a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    Success,
    Failure,
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

impl FromStr for RunResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            _ => Err(format!("unknown run result '{}'", s)),
        }
    }
}

/// One artifact upload performed by a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub kind: UploadKind,
    pub destination: String,
    /// Final URL on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One recorded task execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Assigned by the store on append
    #[serde(default)]
    pub id: u64,
    pub app_name: String,
    pub task_name: String,
    /// Fingerprint of the inputs the run was built from
    pub fingerprint: Digest,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub result: RunResult,
    #[serde(default)]
    pub input_files: Vec<InputFile>,
    #[serde(default)]
    pub input_strings: Vec<String>,
    #[serde(default)]
    pub uploads: Vec<UploadRecord>,
}

impl RunRecord {
    /// Create a record with no inputs or uploads attached
    pub fn new(
        app_name: impl Into<String>,
        task_name: impl Into<String>,
        fingerprint: Digest,
        started_at: DateTime<Utc>,
        duration: Duration,
        result: RunResult,
    ) -> Self {
        Self {
            id: 0,
            app_name: app_name.into(),
            task_name: task_name.into(),
            fingerprint,
            started_at,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            result,
            input_files: Vec::new(),
            input_strings: Vec::new(),
            uploads: Vec::new(),
        }
    }

    /// Attach the inputs the fingerprint was computed from
    pub fn with_inputs(mut self, files: Vec<InputFile>, strings: Vec<String>) -> Self {
        self.input_files = files;
        self.input_strings = strings;
        self
    }

    /// Attach upload outcomes
    pub fn with_uploads(mut self, uploads: Vec<UploadRecord>) -> Self {
        self.uploads = uploads;
        self
    }

    /// Task this run belongs to
    pub fn task_id(&self) -> TaskId {
        TaskId::new(&self.app_name, &self.task_name)
    }

    /// Run time
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn is_success(&self) -> bool {
        self.result == RunResult::Success
    }
}

/// Filters selecting successful runs of `id` built from `fingerprint`
pub fn cache_filters(id: &TaskId, fingerprint: &Digest) -> Result<Vec<Filter>, QueryError> {
    Ok(vec![
        Filter::eq(Field::AppName, id.app.as_str())?,
        Filter::eq(Field::TaskName, id.task_name.as_str())?,
        Filter::eq(Field::Fingerprint, fingerprint.to_string())?,
        Filter::eq(Field::Result, RunResult::Success.to_string())?,
    ])
}
