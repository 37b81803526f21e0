//! `spamsub branches list|prune`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use super::{home, open_engine};

#[derive(Subcommand, Debug)]
pub enum BranchesCommand {
    /// List integration branches kept in the working copy.
    List,
    /// Delete integration branches older than a cutoff.
    Prune(PruneArgs),
}

#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Keep branches created within this many hours.
    #[arg(long, default_value_t = 24 * 7)]
    pub older_than_hours: i64,

    /// Also delete the branches from the fork remote.
    #[arg(long)]
    pub remote: bool,
}

#[derive(Tabled)]
struct BranchRow {
    branch: String,
    #[tabled(rename = "created (UTC)")]
    created: String,
    age: String,
}

pub fn run(command: BranchesCommand) -> Result<()> {
    let engine = open_engine(&home()?)?;

    match command {
        BranchesCommand::List => {
            let branches = engine
                .list_branches()
                .context("failed to list integration branches")?;
            if branches.is_empty() {
                println!("No integration branches.");
                return Ok(());
            }
            let rows: Vec<BranchRow> = branches
                .into_iter()
                .map(|b| BranchRow {
                    branch: b.name,
                    created: b.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    age: b.age,
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        BranchesCommand::Prune(args) => {
            let cutoff = chrono::Duration::try_hours(args.older_than_hours.max(0))
                .context("--older-than-hours is out of range")?;
            let report = engine
                .prune_branches(cutoff, args.remote)
                .context("failed to prune integration branches")?;

            for name in &report.deleted {
                let remote = if report.remote_deleted.contains(name) {
                    " (and on the fork)"
                } else {
                    ""
                };
                println!("  ✗  {name}{remote}");
            }
            for (name, err) in &report.failed {
                println!("{}", format!("  !  {name}: {err}").yellow());
            }
            println!(
                "✓ pruned {} branches, kept {}",
                report.deleted.len(),
                report.kept.len()
            );
        }
    }
    Ok(())
}
