//! `spamsub export [--output <path>]`

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use super::{home, open_engine};

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Write to this file instead of stdout.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

impl ExportArgs {
    pub fn run(self) -> Result<()> {
        let engine = open_engine(&home()?)?;
        let rendered = engine
            .render_artifact()
            .context("failed to render the spammer list")?;

        match self.output {
            Some(path) => {
                fs::write(&path, &rendered)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                eprintln!("✓ exported to {}", path.display());
            }
            None => print!("{rendered}"),
        }
        Ok(())
    }
}
