//! History command: query recorded runs

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Args;
use console::style;
use tracing::info;

use gantry_tasks::{
    Field, Filter, HistoryStore, JsonHistoryStore, Operator, RunRecord, RunResult, Sorter,
};

use crate::cli::{load_workspace, output, Cli, OutputFormat};

/// Query recorded runs
#[derive(Debug, Args)]
pub struct HistoryCommand {
    /// Only runs of this app
    #[arg(long)]
    pub app: Option<String>,

    /// Only runs of this task name
    #[arg(long)]
    pub task: Option<String>,

    /// Only runs that took longer than this many seconds
    #[arg(long, value_name = "SECS")]
    pub longer_than: Option<u64>,

    /// Only runs started after this time
    #[arg(long, value_name = "RFC3339")]
    pub since: Option<String>,

    /// Only runs built from this fingerprint
    #[arg(long, value_name = "DIGEST")]
    pub fingerprint: Option<String>,

    /// Only runs that read this input file (relative to the repository root)
    #[arg(long, value_name = "PATH")]
    pub input: Option<String>,

    /// Only failed runs
    #[arg(long)]
    pub failed: bool,

    /// Sort key, e.g. duration:desc (repeatable)
    #[arg(long, value_name = "FIELD[:asc|desc]")]
    pub sort: Vec<String>,

    /// Maximum number of runs to show
    #[arg(long, default_value = "20")]
    pub limit: usize,
}

impl HistoryCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let filters = self.filters()?;
        let sorters = self.sorters()?;
        info!(filters = filters.len(), sorters = sorters.len(), "executing history command");

        let (config, root) = load_workspace()?;
        let store = JsonHistoryStore::open(&root.join(&config.build.history))?;
        let records = store
            .query(&filters, &sorters)?
            .take(self.limit)
            .collect::<Result<Vec<_>, _>>()?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&records)?);
            return Ok(());
        }

        if records.is_empty() {
            if !cli.quiet {
                output::info("No matching runs.");
            }
            return Ok(());
        }

        for record in &records {
            print_record(record);
        }
        Ok(())
    }

    fn filters(&self) -> anyhow::Result<Vec<Filter>> {
        let mut filters = Vec::new();
        if let Some(app) = &self.app {
            filters.push(Filter::eq(Field::AppName, app.as_str())?);
        }
        if let Some(task) = &self.task {
            filters.push(Filter::eq(Field::TaskName, task.as_str())?);
        }
        if let Some(secs) = self.longer_than {
            filters.push(Filter::new(Field::Duration, Operator::Gt, secs)?);
        }
        if let Some(since) = &self.since {
            let since: DateTime<Utc> = DateTime::parse_from_rfc3339(since)
                .with_context(|| format!("Invalid --since time '{}'", since))?
                .with_timezone(&Utc);
            filters.push(Filter::new(Field::StartTime, Operator::Gt, since)?);
        }
        if let Some(fingerprint) = &self.fingerprint {
            filters.push(Filter::eq(Field::Fingerprint, fingerprint.as_str())?);
        }
        if let Some(input) = &self.input {
            filters.push(Filter::eq(Field::InputFilePath, input.as_str())?);
        }
        if self.failed {
            filters.push(Filter::eq(Field::Result, RunResult::Failure.to_string())?);
        }
        Ok(filters)
    }

    fn sorters(&self) -> anyhow::Result<Vec<Sorter>> {
        self.sort
            .iter()
            .map(|s| Sorter::parse(s).with_context(|| format!("Invalid --sort '{}'", s)))
            .collect()
    }
}

fn print_record(record: &RunRecord) {
    let marker = if record.is_success() {
        style("✓").green()
    } else {
        style("✗").red()
    };
    println!(
        "  {} {:>5} {} {} {} {}",
        marker,
        style(format!("#{}", record.id)).dim(),
        output::task_style().apply_to(record.task_id()),
        style(record.started_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        output::seconds(record.duration()),
        output::digest_style().apply_to(output::short_digest(&record.fingerprint.to_string())),
    );
    for upload in &record.uploads {
        match (&upload.url, &upload.error) {
            (Some(url), _) => println!("        {} {}", style("↑").dim(), url),
            (None, Some(e)) => println!(
                "        {} {} {}",
                style("↑").red(),
                upload.destination,
                style(e).red().dim()
            ),
            (None, None) => {}
        }
    }
}
