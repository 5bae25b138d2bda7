//! CLI definition and command handling

pub mod commands;
pub mod output;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use gantry_core::config::{load_config_from_dir, Config};

use commands::{DigestCommand, HistoryCommand, InitCommand, RunCommand};

/// Gantry - Monorepo build orchestrator
#[derive(Debug, Parser)]
#[command(name = "gantry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Show build output and debug logs
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Report format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Run as if started in this directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// How command results are printed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Styled text for terminals
    #[default]
    Text,
    /// Machine-readable JSON on stdout
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write a starter gantry.toml
    Init(InitCommand),

    /// Build every task whose inputs changed since its last successful run
    Run(RunCommand),

    /// Query recorded runs
    History(HistoryCommand),

    /// Print content digests of files
    Digest(DigestCommand),
}

impl Cli {
    pub fn execute(self) -> anyhow::Result<()> {
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)
                .with_context(|| format!("Cannot change to {}", dir.display()))?;
        }

        match self.command {
            Commands::Init(ref cmd) => cmd.execute(&self),
            Commands::Run(ref cmd) => cmd.execute(&self),
            Commands::History(ref cmd) => cmd.execute(&self),
            Commands::Digest(ref cmd) => cmd.execute(&self),
        }
    }
}

/// Configuration and the repository root it was found in
pub fn load_workspace() -> anyhow::Result<(Config, PathBuf)> {
    let cwd = std::env::current_dir()?;
    let (config, path) = load_config_from_dir(&cwd)
        .context("No usable gantry configuration found; run `gantry init` to create one")?;
    let root = path
        .parent()
        .map(PathBuf::from)
        .unwrap_or(cwd);
    Ok((config, root))
}
