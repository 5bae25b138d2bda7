//! Task orchestrator: fingerprint, consult history, build, upload, record
//!
//! Every task is planned (resolve, digest, history lookup) on its own scoped
//! thread. Builds and uploads run on one shared [`WorkerPool`]. The calling
//! thread only routes completions: it queues a build once a task is planned
//! and its uploads once the build succeeded, so dependent work is always
//! queued after the work it depends on finished.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, instrument, warn};

use gantry_core::Digest;

use crate::fingerprint::{Fingerprint, FingerprintError, InputDigester};
use crate::history::{cache_filters, HistoryStore, RunRecord, RunResult, UploadRecord};
use crate::inputs::{resolve_all, GlobResolver, GoModuleIndex, InputResolver, SourceDepsResolver};
use crate::job::{Job, JobResult, ShellCommand};
use crate::pool::WorkerPool;
use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::{TaskDefinition, TaskId};
use crate::upload::{UploadJob, UploadKind, UploadResult, Uploaders};

/// Options for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Worker pool size shared by all jobs
    pub concurrency: usize,
    /// Rebuild even when history has a matching successful run
    pub force: bool,
    /// Repository root; recorded input paths are relative to it
    pub root_dir: PathBuf,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            concurrency: num_cpus(),
            force: false,
            root_dir: std::env::current_dir().unwrap_or_default(),
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// How a task ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// A successful run with the same fingerprint was found
    Skipped,
    /// Built, and every artifact uploaded
    Succeeded,
    /// The build command failed, timed out, or could not start
    FailedBuild(String),
    /// The build succeeded but an artifact upload did not
    FailedUpload(String),
    /// Inputs could not be resolved or digested
    FailedResolution(String),
}

impl TaskOutcome {
    /// Skipped or succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Skipped | Self::Succeeded)
    }

    /// Short label for display
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Succeeded => "succeeded",
            Self::FailedBuild(_) => "failed-build",
            Self::FailedUpload(_) => "failed-upload",
            Self::FailedResolution(_) => "failed-resolution",
        }
    }

    /// Failure message, if any
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Skipped | Self::Succeeded => None,
            Self::FailedBuild(e) | Self::FailedUpload(e) | Self::FailedResolution(e) => Some(e),
        }
    }
}

/// Result of one task in a run
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub outcome: TaskOutcome,
    /// Input fingerprint, when inputs resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Digest>,
    /// Build time; zero when no build ran
    pub duration_ms: u64,
    pub uploads: Vec<UploadRecord>,
    /// ID of the appended history record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<u64>,
    /// Set when the run could not be recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_error: Option<String>,
    /// Combined build output
    #[serde(skip)]
    pub output: String,
}

/// Aggregate of every task outcome in a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tasks: Vec<TaskReport>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Report for one task
    pub fn get(&self, id: &TaskId) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Succeeded))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| !o.is_success())
    }

    /// Every task skipped or succeeded, and every built task was recorded
    pub fn is_success(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| t.outcome.is_success() && t.record_error.is_none())
    }

    fn count(&self, f: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.tasks.iter().filter(|t| f(&t.outcome)).count()
    }
}

struct Plan {
    fingerprint: Fingerprint,
    cached: Option<RunRecord>,
}

struct Build {
    started_at: DateTime<Utc>,
    duration: Duration,
    error: Option<String>,
    output: String,
}

#[derive(Debug)]
enum Stage {
    Build,
    Upload { kind: UploadKind, destination: String },
}

enum Message {
    Built(JobResult<usize>),
    Uploaded(UploadResult<usize>),
    Panicked {
        index: usize,
        stage: Stage,
    },
}

struct TaskState {
    id: TaskId,
    plan: Option<Plan>,
    build: Option<Build>,
    pending_uploads: usize,
    uploads: Vec<UploadRecord>,
    outcome: Option<TaskOutcome>,
    record_id: Option<u64>,
    record_error: Option<String>,
}

impl TaskState {
    fn new(id: TaskId) -> Self {
        Self {
            id,
            plan: None,
            build: None,
            pending_uploads: 0,
            uploads: Vec::new(),
            outcome: None,
            record_id: None,
            record_error: None,
        }
    }

    fn into_report(self) -> TaskReport {
        let (duration, output) = self
            .build
            .map(|b| (b.duration, b.output))
            .unwrap_or_default();
        TaskReport {
            outcome: self
                .outcome
                .unwrap_or_else(|| TaskOutcome::FailedBuild("task did not complete".to_string())),
            id: self.id,
            fingerprint: self.plan.map(|p| p.fingerprint.digest),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            uploads: self.uploads,
            record_id: self.record_id,
            record_error: self.record_error,
            output,
        }
    }
}

/// Runs tasks against a run-history store.
///
/// A task whose inputs match a recorded successful run is skipped. Every
/// other task is built; artifacts of a successful build are uploaded, and
/// the build is recorded. Failures are isolated per task.
pub struct Orchestrator {
    options: OrchestratorOptions,
    store: Arc<dyn HistoryStore>,
    uploaders: Uploaders,
    reporter: Arc<dyn TaskReporter>,
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new(
        options: OrchestratorOptions,
        store: Arc<dyn HistoryStore>,
        uploaders: Uploaders,
        reporter: Arc<dyn TaskReporter>,
    ) -> Self {
        Self {
            options,
            store,
            uploaders,
            reporter,
        }
    }

    /// Run all tasks to completion
    #[instrument(skip_all, fields(tasks = tasks.len(), concurrency = self.options.concurrency))]
    pub fn run(&self, tasks: &[TaskDefinition]) -> RunReport {
        let start = Instant::now();
        let pool = WorkerPool::new(self.options.concurrency);
        let (tx, rx) = mpsc::channel();
        let mut states: Vec<TaskState> = tasks
            .iter()
            .map(|t| TaskState::new(t.id.clone()))
            .collect();
        let mut outstanding = 0usize;

        for (index, plan) in self.plan_all(tasks).into_iter().enumerate() {
            outstanding += self.on_planned(
                &pool,
                &tx,
                index,
                &tasks[index],
                &mut states[index],
                plan,
            );
        }

        while outstanding > 0 {
            let Ok(message) = rx.recv() else {
                error!("job channel closed with {} jobs outstanding", outstanding);
                break;
            };
            outstanding -= 1;

            match message {
                Message::Built(result) => {
                    let index = result.user_data;
                    outstanding +=
                        self.on_built(&pool, &tx, &tasks[index], &mut states[index], result);
                }
                Message::Uploaded(result) => {
                    let index = result.user_data;
                    self.on_uploaded(&tasks[index], &mut states[index], result);
                }
                Message::Panicked { index, stage } => {
                    self.on_panicked(&tasks[index], &mut states[index], stage);
                }
            }
        }

        drop(tx);
        pool.wait();

        let report = RunReport {
            tasks: states.into_iter().map(TaskState::into_report).collect(),
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        self.reporter.report(&TaskEvent::AllCompleted {
            total: report.tasks.len(),
            succeeded: report.succeeded(),
            failed: report.failed(),
            skipped: report.skipped(),
            duration: start.elapsed(),
        });
        report
    }

    /// Plan every task concurrently, one scoped thread per task.
    ///
    /// Planning never occupies a pool slot, and all plans are settled before
    /// the first build is queued.
    fn plan_all(&self, tasks: &[TaskDefinition]) -> Vec<Result<Plan, String>> {
        let root = self.options.root_dir.as_path();
        let store = self.store.as_ref();
        let force = self.options.force;

        thread::scope(|scope| {
            let handles: Vec<_> = tasks
                .iter()
                .map(|task| scope.spawn(move || plan_task(task, root, store, force)))
                .collect();
            handles
                .into_iter()
                .zip(tasks)
                .map(|(handle, task)| match handle.join() {
                    Ok(plan) => plan.map_err(|e| e.to_string()),
                    Err(_) => {
                        error!(task = %task.id, "input planning panicked");
                        Err("input planning panicked".to_string())
                    }
                })
                .collect()
        })
    }

    /// Returns the number of jobs queued
    fn on_planned(
        &self,
        pool: &WorkerPool,
        tx: &Sender<Message>,
        index: usize,
        task: &TaskDefinition,
        state: &mut TaskState,
        plan: Result<Plan, String>,
    ) -> usize {
        let plan = match plan {
            Ok(plan) => plan,
            Err(error) => {
                self.reporter.report(&TaskEvent::ResolutionFailed {
                    id: task.id.clone(),
                    error: error.clone(),
                });
                state.outcome = Some(TaskOutcome::FailedResolution(error));
                return 0;
            }
        };

        self.reporter.report(&TaskEvent::Planned {
            id: task.id.clone(),
            fingerprint: plan.fingerprint.digest.clone(),
            inputs: plan.fingerprint.files.len(),
        });

        if let Some(record) = &plan.cached {
            self.reporter.report(&TaskEvent::CacheHit {
                id: task.id.clone(),
                fingerprint: plan.fingerprint.digest.clone(),
                record_id: record.id,
            });
            state.outcome = Some(TaskOutcome::Skipped);
            state.plan = Some(plan);
            return 0;
        }
        state.plan = Some(plan);

        let command = ShellCommand::new(&task.command, &task.dir).with_timeout(task.timeout);
        let reporter = self.reporter.clone();
        let id = task.id.clone();
        let job = Job::new(index, move || {
            reporter.report(&TaskEvent::BuildStarted {
                id: id.clone(),
                command: command.command.clone(),
            });
            command.run(&|line: &str, is_stderr: bool| {
                reporter.report(&TaskEvent::Output {
                    id: id.clone(),
                    line: line.to_string(),
                    is_stderr,
                })
            })
        });
        submit(pool, tx, index, Stage::Build, move || Message::Built(job.run()));
        1
    }

    /// Returns the number of jobs queued
    fn on_built(
        &self,
        pool: &WorkerPool,
        tx: &Sender<Message>,
        task: &TaskDefinition,
        state: &mut TaskState,
        result: JobResult<usize>,
    ) -> usize {
        let error = if let Some(e) = &result.error {
            Some(e.to_string())
        } else if !result.is_success() {
            Some(format!("exit code {}", result.exit_code.unwrap_or(-1)))
        } else {
            None
        };

        self.reporter.report(&TaskEvent::BuildFinished {
            id: task.id.clone(),
            duration: result.duration(),
            success: error.is_none(),
            error: error.clone(),
        });

        let failed = error.is_some();
        state.build = Some(Build {
            started_at: result.started_at,
            duration: result.duration(),
            error,
            output: result.output,
        });
        if failed {
            self.finish(task, state);
            return 0;
        }

        let index = result.user_data;
        let mut queued = 0;
        for output in &task.outputs {
            match UploadJob::from_output(output, &task.dir, index) {
                Ok(job) => {
                    let stage = Stage::Upload {
                        kind: job.kind(),
                        destination: job.destination().to_string(),
                    };
                    let uploaders = self.uploaders.clone();
                    submit(pool, tx, index, stage, move || Message::Uploaded(job.run(&uploaders)));
                    queued += 1;
                }
                Err(e) => self.record_upload(
                    task,
                    state,
                    UploadRecord {
                        kind: UploadKind::from(output),
                        destination: output.destination().to_string(),
                        url: None,
                        error: Some(e.to_string()),
                    },
                ),
            }
        }

        state.pending_uploads = queued;
        if queued == 0 {
            self.finish(task, state);
        }
        queued
    }

    fn on_uploaded(
        &self,
        task: &TaskDefinition,
        state: &mut TaskState,
        result: UploadResult<usize>,
    ) {
        let (url, error) = match result.outcome {
            Ok(url) => (Some(url), None),
            Err(e) => (None, Some(e.to_string())),
        };
        self.record_upload(
            task,
            state,
            UploadRecord {
                kind: result.kind,
                destination: result.destination,
                url,
                error,
            },
        );
        self.upload_done(task, state);
    }

    fn on_panicked(&self, task: &TaskDefinition, state: &mut TaskState, stage: Stage) {
        error!(task = %task.id, ?stage, "job panicked");
        match stage {
            Stage::Build => {
                state.build = Some(Build {
                    started_at: Utc::now(),
                    duration: Duration::ZERO,
                    error: Some("build job panicked".to_string()),
                    output: String::new(),
                });
                self.finish(task, state);
            }
            Stage::Upload { kind, destination } => {
                self.record_upload(
                    task,
                    state,
                    UploadRecord {
                        kind,
                        destination,
                        url: None,
                        error: Some("upload job panicked".to_string()),
                    },
                );
                self.upload_done(task, state);
            }
        }
    }

    fn record_upload(&self, task: &TaskDefinition, state: &mut TaskState, upload: UploadRecord) {
        self.reporter.report(&TaskEvent::UploadFinished {
            id: task.id.clone(),
            kind: upload.kind,
            destination: upload.destination.clone(),
            error: upload.error.clone(),
        });
        state.uploads.push(upload);
    }

    fn upload_done(&self, task: &TaskDefinition, state: &mut TaskState) {
        state.pending_uploads = state.pending_uploads.saturating_sub(1);
        if state.pending_uploads == 0 {
            self.finish(task, state);
        }
    }

    /// Settle the outcome of a built task and append it to history
    fn finish(&self, task: &TaskDefinition, state: &mut TaskState) {
        let (Some(plan), Some(build)) = (&state.plan, &state.build) else {
            return;
        };

        let failed_uploads: Vec<String> = state
            .uploads
            .iter()
            .filter_map(|u| u.error.as_ref().map(|e| format!("{}: {}", u.destination, e)))
            .collect();
        let outcome = match &build.error {
            Some(e) => TaskOutcome::FailedBuild(e.clone()),
            None if !failed_uploads.is_empty() => {
                TaskOutcome::FailedUpload(failed_uploads.join("; "))
            }
            None => TaskOutcome::Succeeded,
        };
        let result = if outcome == TaskOutcome::Succeeded {
            RunResult::Success
        } else {
            RunResult::Failure
        };

        let record = RunRecord::new(
            &task.id.app,
            &task.id.task_name,
            plan.fingerprint.digest.clone(),
            build.started_at,
            build.duration,
            result,
        )
        .with_inputs(plan.fingerprint.files.clone(), task.strings.clone())
        .with_uploads(state.uploads.clone());

        match self.store.append(record) {
            Ok(record_id) => {
                self.reporter.report(&TaskEvent::Recorded {
                    id: task.id.clone(),
                    record_id,
                });
                state.record_id = Some(record_id);
            }
            Err(e) => {
                error!(task = %task.id, error = %e, "failed to record run");
                state.record_error = Some(e.to_string());
            }
        }
        state.outcome = Some(outcome);
    }
}

/// Queue work whose completion is reported on `tx`, even if it panics
fn submit<F>(pool: &WorkerPool, tx: &Sender<Message>, index: usize, stage: Stage, work: F)
where
    F: FnOnce() -> Message + Send + 'static,
{
    let tx = tx.clone();
    pool.queue(move || {
        let message = panic::catch_unwind(AssertUnwindSafe(work))
            .unwrap_or_else(|_| Message::Panicked { index, stage });
        if tx.send(message).is_err() {
            debug!("orchestrator stopped listening");
        }
    });
}

/// Values folded into the fingerprint after the files: literal strings in
/// order, then `NAME=value` for each environment input sorted by name
pub fn fingerprint_extras(task: &TaskDefinition) -> Vec<String> {
    let mut env: Vec<String> = task
        .env
        .iter()
        .map(|name| format!("{}={}", name, std::env::var(name).unwrap_or_default()))
        .collect();
    env.sort();
    task.strings.iter().cloned().chain(env).collect()
}

/// Resolve and digest a task's inputs
pub fn fingerprint_task(
    task: &TaskDefinition,
    root: &Path,
) -> Result<Fingerprint, FingerprintError> {
    let mut resolvers: Vec<Box<dyn InputResolver>> = Vec::new();
    if !task.inputs.is_empty() {
        resolvers.push(Box::new(GlobResolver::new(task.dir.clone(), task.inputs.clone())));
    }
    if !task.go_sources.is_empty() {
        let index = GoModuleIndex::open(&task.dir)?;
        let roots = task.go_sources.iter().map(|d| task.dir.join(d)).collect();
        resolvers.push(Box::new(SourceDepsResolver::new(index, roots)));
    }

    let refs: Vec<&dyn InputResolver> = resolvers.iter().map(|r| r.as_ref()).collect();
    let inputs = resolve_all(&refs)?;
    let fingerprint = InputDigester::new(root).combine(&inputs, &fingerprint_extras(task))?;
    Ok(fingerprint)
}

fn plan_task(
    task: &TaskDefinition,
    root: &Path,
    store: &dyn HistoryStore,
    force: bool,
) -> Result<Plan, FingerprintError> {
    let fingerprint = fingerprint_task(task, root)?;
    let cached = if force {
        None
    } else {
        find_successful_run(store, &task.id, &fingerprint.digest)
    };
    debug!(task = %task.id, fingerprint = %fingerprint.digest, hit = cached.is_some(), "planned");
    Ok(Plan {
        fingerprint,
        cached,
    })
}

/// A lookup failure counts as a miss; the task is rebuilt
fn find_successful_run(
    store: &dyn HistoryStore,
    id: &TaskId,
    fingerprint: &Digest,
) -> Option<RunRecord> {
    let filters = match cache_filters(id, fingerprint) {
        Ok(filters) => filters,
        Err(e) => {
            warn!(task = %id, error = %e, "invalid history filter");
            return None;
        }
    };
    match store.find_first(&filters) {
        Ok(found) => found,
        Err(e) => {
            warn!(task = %id, error = %e, "history lookup failed, rebuilding");
            None
        }
    }
}
