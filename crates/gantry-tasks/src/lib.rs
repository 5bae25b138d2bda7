//! Gantry Tasks - Build orchestration engine
//!
//! This crate resolves and fingerprints task inputs, runs builds and
//! artifact uploads on a bounded worker pool, and keeps a queryable history
//! of runs so unchanged tasks can be skipped.

pub mod fingerprint;
pub mod history;
pub mod inputs;
pub mod job;
pub mod orchestrator;
pub mod pool;
pub mod reporter;
pub mod task;
pub mod upload;

pub use fingerprint::{Fingerprint, FingerprintError, InputDigester, InputFile};
pub use history::{
    Field, Filter, FilterValue, HistoryStore, JsonHistoryStore, MemoryHistoryStore, Operator,
    Order, QueryError, RunRecord, RunResult, Sorter, StorageError,
};
pub use inputs::{
    GlobResolver, GoModuleIndex, InputResolver, ResolveError, ResolvedInputSet, SourceDepsResolver,
};
pub use job::{Job, JobError, JobOutput, JobResult, ShellCommand};
pub use orchestrator::{Orchestrator, OrchestratorOptions, RunReport, TaskOutcome, TaskReport};
pub use pool::{PoolState, WorkerPool};
pub use reporter::{
    CollectingReporter, TaskEvent, TaskReporter, TaskReporterRegistry, TracingReporter,
};
pub use task::{definitions_from_config, TaskDefinition, TaskId};
pub use upload::{ArtifactSink, FilesystemSink, UploadError, UploadJob, UploadKind, Uploaders};
