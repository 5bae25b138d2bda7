//! Digest command: print content digests

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use gantry_core::{digest_file, Digest};
use gantry_tasks::{InputDigester, ResolvedInputSet};

use crate::cli::{output, Cli, OutputFormat};

/// Print content digests of files
#[derive(Debug, Args)]
pub struct DigestCommand {
    /// Files to digest
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Also print the combined fingerprint of all files, as a task would compute it
    #[arg(long)]
    pub combined: bool,
}

#[derive(Debug, Serialize)]
struct FileDigest {
    path: String,
    digest: Digest,
}

#[derive(Debug, Serialize)]
struct DigestOutput {
    files: Vec<FileDigest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    combined: Option<Digest>,
}

impl DigestCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;

        let files = self
            .files
            .iter()
            .map(|path| {
                Ok(FileDigest {
                    path: path.display().to_string(),
                    digest: digest_file(&cwd.join(path))?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let combined = if self.combined {
            let set: ResolvedInputSet = self.files.iter().map(|p| cwd.join(p)).collect();
            let no_extras: &[&str] = &[];
            Some(InputDigester::new(&cwd).combine(&set, no_extras)?.digest)
        } else {
            None
        };

        if cli.format == OutputFormat::Json {
            let out = DigestOutput { files, combined };
            println!("{}", serde_json::to_string_pretty(&out)?);
            return Ok(());
        }

        for file in &files {
            println!("{}  {}", file.digest, file.path);
        }
        if let Some(combined) = combined {
            if !cli.quiet {
                println!();
            }
            output::info(&format!("combined {}", combined));
        }
        Ok(())
    }
}
