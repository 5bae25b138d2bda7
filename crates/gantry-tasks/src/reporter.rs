//! Run progress reporting

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gantry_core::Digest;
use tracing::{debug, error, info, trace};

use crate::task::TaskId;
use crate::upload::UploadKind;

/// Events emitted during an orchestrator run
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// Inputs resolved and fingerprinted
    Planned {
        id: TaskId,
        fingerprint: Digest,
        inputs: usize,
    },
    /// A successful run with the same fingerprint exists; the build is skipped
    CacheHit {
        id: TaskId,
        fingerprint: Digest,
        record_id: u64,
    },
    /// Inputs could not be resolved or digested
    ResolutionFailed {
        id: TaskId,
        error: String,
    },
    /// A build job is starting
    BuildStarted {
        id: TaskId,
        command: String,
    },
    /// One line of build output
    Output {
        id: TaskId,
        line: String,
        is_stderr: bool,
    },
    /// A build job finished
    BuildFinished {
        id: TaskId,
        duration: Duration,
        success: bool,
        error: Option<String>,
    },
    /// An artifact upload finished
    UploadFinished {
        id: TaskId,
        kind: UploadKind,
        destination: String,
        error: Option<String>,
    },
    /// The run was appended to history
    Recorded {
        id: TaskId,
        record_id: u64,
    },
    /// Every task reached a final outcome
    AllCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        duration: Duration,
    },
}

/// Observer of one orchestrator run.
///
/// Reporters are called from the orchestrator's coordinating thread and from
/// build workers (for [`TaskEvent::Output`]), so they must be thread-safe.
pub trait TaskReporter: Send + Sync {
    fn report(&self, event: &TaskEvent);
}

/// Writes every event to the `tracing` subscriber
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Planned {
                id,
                fingerprint,
                inputs,
            } => debug!(task = %id, %fingerprint, inputs, "planned"),
            TaskEvent::CacheHit { id, record_id, .. } => {
                info!(task = %id, record_id, "unchanged, skipping build")
            }
            TaskEvent::ResolutionFailed { id, error } => {
                error!(task = %id, %error, "input resolution failed")
            }
            TaskEvent::BuildStarted { id, command } => info!(task = %id, %command, "build started"),
            // Live output belongs to the console; logs keep it below the default filter
            TaskEvent::Output {
                id,
                line,
                is_stderr: true,
            } => debug!(task = %id, stderr = true, "{}", line),
            TaskEvent::Output { id, line, .. } => trace!(task = %id, "{}", line),
            TaskEvent::BuildFinished {
                id,
                duration,
                success: true,
                ..
            } => info!(task = %id, secs = duration.as_secs_f64(), "build succeeded"),
            TaskEvent::BuildFinished {
                id, duration, error, ..
            } => error!(
                task = %id,
                secs = duration.as_secs_f64(),
                error = error.as_deref().unwrap_or("unknown"),
                "build failed"
            ),
            TaskEvent::UploadFinished {
                id,
                kind,
                destination,
                error: None,
            } => info!(task = %id, %kind, %destination, "artifact uploaded"),
            TaskEvent::UploadFinished {
                id,
                kind,
                destination,
                error: Some(error),
            } => error!(task = %id, %kind, %destination, %error, "artifact upload failed"),
            TaskEvent::Recorded { id, record_id } => debug!(task = %id, record_id, "run recorded"),
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                skipped,
                duration,
            } => info!(
                total,
                succeeded,
                failed,
                skipped,
                secs = duration.as_secs_f64(),
                "run finished"
            ),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Snapshot of the events seen so far, in arrival order
    pub fn events(&self) -> Vec<TaskEvent> {
        self.lock().clone()
    }

    /// Number of events accepted by `predicate`
    pub fn count(&self, predicate: impl Fn(&TaskEvent) -> bool) -> usize {
        self.lock().iter().filter(|e| predicate(e)).count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TaskEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.lock().push(event.clone());
    }
}

/// Fans each event out to several reporters, in registration order
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    /// Registry that starts with a [`TracingReporter`]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(TracingReporter));
        registry
    }

    pub fn empty() -> Self {
        Self { reporters: Vec::new() }
    }

    pub fn register(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskReporter for TaskReporterRegistry {
    fn report(&self, event: &TaskEvent) {
        self.reporters.iter().for_each(|r| r.report(event));
    }
}
