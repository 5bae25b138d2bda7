//! Init command: write a starter configuration

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use gantry_core::config::defaults::{DEFAULT_CONFIG_TEMPLATE, DEFAULT_CONFIG_TOML};

use crate::cli::{output, Cli, OutputFormat};

/// Write a starter gantry.toml
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Replace an existing file
    #[arg(short, long)]
    pub force: bool,

    /// Where to write the configuration (default: ./gantry.toml)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl InitCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(force = self.force, "executing init command");
        let config_path = match &self.output {
            Some(path) => path.clone(),
            None => std::env::current_dir()?.join(DEFAULT_CONFIG_TOML),
        };

        if config_path.exists() && !self.force {
            anyhow::bail!(
                "Configuration file already exists at {}. Use --force to overwrite.",
                config_path.display()
            );
        }

        std::fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE)?;

        if cli.format == OutputFormat::Json {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "path": config_path.display().to_string(),
                }))?
            );
        } else if !cli.quiet {
            output::success(&format!("Created {}", config_path.display()));
        }
        Ok(())
    }
}
