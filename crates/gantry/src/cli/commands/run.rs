//! Run command: build tasks whose inputs changed

use std::sync::Arc;

use clap::Args;
use console::style;
use tracing::info;

use gantry_tasks::{
    definitions_from_config, FilesystemSink, JsonHistoryStore, Orchestrator, OrchestratorOptions,
    RunReport, TaskEvent, TaskId, TaskReporter, TaskReporterRegistry, Uploaders,
};

use crate::cli::{load_workspace, output, Cli, OutputFormat};
use crate::exit_codes;

/// Build every task whose inputs changed since its last successful run
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Tasks to run as app:task (default: all)
    pub tasks: Vec<String>,

    /// Only run tasks of this app
    #[arg(long)]
    pub app: Option<String>,

    /// Maximum concurrent jobs
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Rebuild even when inputs are unchanged
    #[arg(long)]
    pub force: bool,
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let (config, root) = match load_workspace() {
            Ok(loaded) => loaded,
            Err(e) => {
                output::error(&format!("{:#}", e));
                std::process::exit(exit_codes::CONFIG_ERROR);
            }
        };

        if let Some(app) = &self.app {
            if config.app(app).is_none() {
                anyhow::bail!("Unknown app '{}'", app);
            }
        }

        let wanted = self
            .tasks
            .iter()
            .map(|s| {
                TaskId::parse(s)
                    .ok_or_else(|| anyhow::anyhow!("Invalid task '{}', expected app:task", s))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut tasks = definitions_from_config(&root, &config, self.app.as_deref());
        if !wanted.is_empty() {
            if let Some(missing) = wanted.iter().find(|id| !tasks.iter().any(|t| &t.id == *id)) {
                anyhow::bail!("Unknown task '{}'", missing);
            }
            tasks.retain(|t| wanted.contains(&t.id));
        }

        if tasks.is_empty() {
            if !cli.quiet && cli.format == OutputFormat::Text {
                output::success("No tasks to run.");
            }
            return Ok(());
        }

        let concurrency = self.concurrency.unwrap_or(config.build.concurrency);
        info!(tasks = tasks.len(), concurrency, force = self.force, "executing run command");

        if !cli.quiet && cli.format == OutputFormat::Text {
            output::info(&format!(
                "{} task{} with {} worker{}",
                tasks.len(),
                if tasks.len() == 1 { "" } else { "s" },
                concurrency,
                if concurrency == 1 { "" } else { "s" },
            ));
            println!();
        }

        let store = Arc::new(JsonHistoryStore::open(&root.join(&config.build.history))?);
        let artifacts = FilesystemSink::new(root.join(&config.build.artifacts));
        let uploaders = Uploaders::new().with_s3(Arc::new(artifacts));

        let mut reporters = TaskReporterRegistry::new();
        if !cli.quiet && cli.format == OutputFormat::Text {
            reporters.register(Arc::new(ConsoleReporter::new(cli.verbose)));
        }

        let options = OrchestratorOptions {
            concurrency,
            force: self.force,
            root_dir: root,
        };
        let report = Orchestrator::new(options, store, uploaders, Arc::new(reporters)).run(&tasks);

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else if !cli.quiet {
            print_failures(&report);
        }

        if !report.is_success() {
            std::process::exit(exit_codes::TASK_FAILED);
        }
        Ok(())
    }
}

fn print_failures(report: &RunReport) {
    let failed: Vec<_> = report
        .tasks
        .iter()
        .filter(|t| !t.outcome.is_success() || t.record_error.is_some())
        .collect();
    if failed.is_empty() {
        return;
    }

    println!();
    println!(
        "  {} {}/{} tasks failed:",
        style("✗").red().bold(),
        failed.len(),
        report.tasks.len()
    );
    for task in failed {
        let reason = task
            .outcome
            .error()
            .map(str::to_string)
            .or_else(|| task.record_error.as_ref().map(|e| format!("not recorded: {}", e)))
            .unwrap_or_default();
        println!(
            "    {} {} {}: {}",
            style("✗").red(),
            task.id,
            style(task.outcome.label()).dim(),
            reason
        );
    }
}

/// Console reporter with live output
struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Planned { id, fingerprint, inputs } => {
                if self.verbose {
                    println!(
                        "  {} {} {} {}",
                        style("·").dim(),
                        output::task_style().apply_to(id),
                        output::digest_style()
                            .apply_to(output::short_digest(&fingerprint.to_string())),
                        style(format!("({} inputs)", inputs)).dim()
                    );
                }
            }
            TaskEvent::CacheHit { id, .. } => {
                println!(
                    "  {} {} {}",
                    style("○").cyan(),
                    style(id).cyan(),
                    style("(unchanged)").dim()
                );
            }
            TaskEvent::ResolutionFailed { id, error } => {
                println!(
                    "  {} {} {}",
                    style("✗").red(),
                    style(id).red(),
                    style(error).red().dim()
                );
            }
            TaskEvent::BuildStarted { id, command } => {
                println!(
                    "  {} {} {}",
                    style("▸").dim(),
                    output::task_style().apply_to(id),
                    if self.verbose {
                        style(format!("({})", command)).dim().to_string()
                    } else {
                        String::new()
                    }
                );
            }
            TaskEvent::Output { id, line, is_stderr } => {
                if self.verbose {
                    if *is_stderr {
                        println!("    {} {}", style(format!("[{}]", id)).red().dim(), line);
                    } else {
                        println!("    {} {}", style(format!("[{}]", id)).dim(), line);
                    }
                }
            }
            TaskEvent::BuildFinished {
                id,
                duration,
                success,
                error,
            } => {
                if *success {
                    println!(
                        "  {} {} {}",
                        style("✓").green(),
                        style(id).green(),
                        style(output::seconds(*duration)).dim()
                    );
                } else {
                    println!(
                        "  {} {} {} {}",
                        style("✗").red(),
                        style(id).red(),
                        style(output::seconds(*duration)).dim(),
                        style(error.as_deref().unwrap_or("failed")).red().dim()
                    );
                }
            }
            TaskEvent::UploadFinished {
                id,
                kind,
                destination,
                error,
            } => match error {
                None => println!(
                    "  {} {} {} {}",
                    style("↑").green(),
                    style(id).green(),
                    style(kind).dim(),
                    destination
                ),
                Some(e) => println!(
                    "  {} {} {} {} {}",
                    style("↑").red(),
                    style(id).red(),
                    style(kind).dim(),
                    destination,
                    style(e).red().dim()
                ),
            },
            TaskEvent::Recorded { .. } => {}
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                skipped,
                duration,
            } => {
                println!();
                println!(
                    "  {} {}/{} succeeded, {} failed, {} unchanged ({})",
                    if *failed == 0 {
                        style("✓").green().bold()
                    } else {
                        style("✗").red().bold()
                    },
                    succeeded,
                    total,
                    failed,
                    skipped,
                    output::seconds(*duration)
                );
            }
        }
    }
}
