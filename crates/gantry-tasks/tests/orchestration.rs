use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gantry_core::config::OutputConfig;
use gantry_tasks::{
    CollectingReporter, Field, Filter, FilesystemSink, GlobResolver, HistoryStore, InputResolver,
    JsonHistoryStore, MemoryHistoryStore, Orchestrator, OrchestratorOptions, RunResult,
    TaskDefinition, TaskEvent, TaskId, TaskOutcome, Uploaders,
};
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

fn orchestrator(
    root: &Path,
    concurrency: usize,
    store: Arc<dyn HistoryStore>,
    uploaders: Uploaders,
) -> Orchestrator {
    Orchestrator::new(
        OrchestratorOptions {
            concurrency,
            force: false,
            root_dir: root.to_path_buf(),
        },
        store,
        uploaders,
        Arc::new(CollectingReporter::default()),
    )
}

#[test]
fn test_glob_scenario_matches_only_nested_text_files() {
    let temp = TempDir::new().unwrap();
    let x = write(temp.path(), "src/a/x.txt", "x");
    let y = write(temp.path(), "src/a/b/y.txt", "y");
    write(temp.path(), "src/README.md", "readme");

    let set = GlobResolver::single(temp.path(), "src/**/*.txt").resolve().unwrap();

    let found: Vec<&Path> = set.iter().collect();
    let mut expected = vec![x.as_path(), y.as_path()];
    expected.sort();
    assert_eq!(found, expected);
}

#[test]
fn test_identical_inputs_build_once_then_skip() {
    let temp = TempDir::new().unwrap();
    let app = temp.path().join("api");
    write(&app, "src/lib.txt", "shared");

    let first =
        TaskDefinition::new(TaskId::new("api", "build"), &app, "true").with_input("src/**/*.txt");
    let second = first.clone();
    let store = Arc::new(MemoryHistoryStore::new());

    // Both plans run before either build records anything
    let report = orchestrator(temp.path(), 1, store.clone(), Uploaders::new())
        .run(&[first.clone(), second.clone()]);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(store.len(), 2);
    assert_eq!(report.tasks[0].fingerprint, report.tasks[1].fingerprint);

    let report = orchestrator(temp.path(), 4, store.clone(), Uploaders::new()).run(&[second]);
    assert_eq!(report.tasks[0].outcome, TaskOutcome::Skipped);
    assert!(report.tasks[0].record_id.is_none());
    assert_eq!(store.len(), 2);
}

#[test]
fn test_changed_input_rebuilds() {
    let temp = TempDir::new().unwrap();
    let app = temp.path().join("api");
    let source = write(&app, "src/lib.txt", "v1");
    let task =
        TaskDefinition::new(TaskId::new("api", "build"), &app, "true").with_input("src/**/*.txt");
    let store = Arc::new(MemoryHistoryStore::new());

    orchestrator(temp.path(), 2, store.clone(), Uploaders::new()).run(&[task.clone()]);
    fs::write(&source, "v2").unwrap();
    let report = orchestrator(temp.path(), 2, store.clone(), Uploaders::new()).run(&[task]);

    assert_eq!(report.tasks[0].outcome, TaskOutcome::Succeeded);
    assert_eq!(store.len(), 2);
}

#[test]
fn test_same_inputs_different_task_is_not_a_hit() {
    let temp = TempDir::new().unwrap();
    let app = temp.path().join("api");
    write(&app, "src/lib.txt", "shared");
    let store = Arc::new(MemoryHistoryStore::new());

    let build =
        TaskDefinition::new(TaskId::new("api", "build"), &app, "true").with_input("src/**/*.txt");
    let test =
        TaskDefinition::new(TaskId::new("api", "test"), &app, "true").with_input("src/**/*.txt");

    orchestrator(temp.path(), 2, store.clone(), Uploaders::new()).run(&[build]);
    let report = orchestrator(temp.path(), 2, store.clone(), Uploaders::new()).run(&[test]);
    assert_eq!(report.tasks[0].outcome, TaskOutcome::Succeeded);
}

#[test]
fn test_failed_build_is_recorded_and_siblings_continue() {
    let temp = TempDir::new().unwrap();
    let app = temp.path().join("api");
    write(&app, "src/lib.txt", "code");
    let store = Arc::new(MemoryHistoryStore::new());

    let broken = TaskDefinition::new(TaskId::new("api", "lint"), &app, "echo bad >&2; exit 1")
        .with_input("src/**");
    let fine = TaskDefinition::new(TaskId::new("api", "build"), &app, "true").with_input("src/**");

    let report = orchestrator(temp.path(), 2, store.clone(), Uploaders::new())
        .run(&[broken.clone(), fine.clone()]);

    let lint = report.get(&broken.id).unwrap();
    assert_eq!(lint.outcome, TaskOutcome::FailedBuild("exit code 1".to_string()));
    assert!(lint.output.contains("bad"));
    assert_eq!(report.get(&fine.id).unwrap().outcome, TaskOutcome::Succeeded);
    assert!(!report.is_success());

    let failures = [Filter::eq(Field::Result, "failure").unwrap()];
    let recorded = store.find_first(&failures).unwrap().unwrap();
    assert_eq!(recorded.task_name, "lint");

    // A failed run never counts as a cache hit
    let report = orchestrator(temp.path(), 2, store.clone(), Uploaders::new()).run(&[broken]);
    assert!(matches!(report.tasks[0].outcome, TaskOutcome::FailedBuild(_)));
}

#[test]
fn test_build_timeout_fails_task() {
    let temp = TempDir::new().unwrap();
    let app = temp.path().join("api");
    write(&app, "src/lib.txt", "code");
    let task = TaskDefinition::new(TaskId::new("api", "slow"), &app, "sleep 5")
        .with_input("src/**")
        .with_timeout(Duration::from_millis(100));

    let store = Arc::new(MemoryHistoryStore::new());
    let report = orchestrator(temp.path(), 1, store, Uploaders::new()).run(&[task]);
    match &report.tasks[0].outcome {
        TaskOutcome::FailedBuild(message) => assert!(message.contains("timed out")),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_artifacts_uploaded_after_build() {
    let temp = TempDir::new().unwrap();
    let app = temp.path().join("api");
    write(&app, "src/lib.txt", "code");
    let artifacts = temp.path().join("artifacts");

    let task = TaskDefinition::new(
        TaskId::new("api", "package"),
        &app,
        "mkdir -p dist && echo built > dist/api.tar",
    )
    .with_input("src/**")
    .with_output(OutputConfig::File {
        path: "dist/api.tar".into(),
        destination: "releases/api.tar".to_string(),
    });

    let sink = Arc::new(FilesystemSink::new(&artifacts));
    let store = Arc::new(MemoryHistoryStore::new());
    let uploaders = Uploaders::new().with_s3(sink);
    let report = orchestrator(temp.path(), 2, store.clone(), uploaders).run(&[task]);

    let task_report = &report.tasks[0];
    assert_eq!(task_report.outcome, TaskOutcome::Succeeded);
    assert_eq!(task_report.uploads.len(), 1);
    assert!(task_report.uploads[0].url.as_deref().unwrap().starts_with("file://"));
    assert_eq!(fs::read_to_string(artifacts.join("releases/api.tar")).unwrap().trim(), "built");

    let record = store.find_first(&[]).unwrap().unwrap();
    assert_eq!(record.result, RunResult::Success);
    assert_eq!(record.uploads.len(), 1);
}

#[test]
fn test_upload_without_sink_fails_task() {
    let temp = TempDir::new().unwrap();
    let app = temp.path().join("api");
    write(&app, "src/lib.txt", "code");

    let task = TaskDefinition::new(TaskId::new("api", "image"), &app, "echo sha256:abc > image.id")
        .with_input("src/**")
        .with_output(OutputConfig::DockerImage {
            id_file: "image.id".into(),
            destination: "registry.example.com/api:1".to_string(),
        });

    let reporter = Arc::new(CollectingReporter::default());
    let store = Arc::new(MemoryHistoryStore::new());
    let orch = Orchestrator::new(
        OrchestratorOptions {
            concurrency: 2,
            force: false,
            root_dir: temp.path().to_path_buf(),
        },
        store.clone(),
        Uploaders::new(),
        reporter.clone(),
    );
    let report = orch.run(&[task]);

    assert!(matches!(report.tasks[0].outcome, TaskOutcome::FailedUpload(_)));
    let record = store.find_first(&[]).unwrap().unwrap();
    assert_eq!(record.result, RunResult::Failure);
    assert!(reporter
        .events()
        .iter()
        .any(|e| matches!(e, TaskEvent::UploadFinished { error: Some(_), .. })));
}

#[test]
fn test_history_file_survives_between_runs() {
    let temp = TempDir::new().unwrap();
    let app = temp.path().join("web");
    write(&app, "index.txt", "hello");
    let history = temp.path().join(".gantry/history.jsonl");
    let task =
        TaskDefinition::new(TaskId::new("web", "build"), &app, "true").with_input("index.txt");

    let store = Arc::new(JsonHistoryStore::open(&history).unwrap());
    let report = orchestrator(temp.path(), 1, store, Uploaders::new()).run(&[task.clone()]);
    assert_eq!(report.succeeded(), 1);

    let reopened = Arc::new(JsonHistoryStore::open(&history).unwrap());
    let report = orchestrator(temp.path(), 1, reopened, Uploaders::new()).run(&[task]);
    assert_eq!(report.skipped(), 1);
}
