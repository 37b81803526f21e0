//! `spamsub status`: store, counter, sync and branch visibility.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use spamsub_sync::StatusReport;

use super::{home, open_engine};

/// Arguments for `spamsub status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let engine = open_engine(&home()?)?;
        let report = engine.status().context("failed to read engine status")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_report(&report);
        Ok(())
    }
}

#[derive(Tabled)]
struct BranchRow {
    #[tabled(rename = "branch")]
    name: String,
    #[tabled(rename = "created (UTC)")]
    created: String,
    #[tabled(rename = "age")]
    age: String,
}

fn print_report(report: &StatusReport) {
    println!(
        "Spamsub v{} | {} addresses",
        env!("CARGO_PKG_VERSION"),
        report.address_count
    );

    let separator = "■".repeat(60).bright_black().to_string();
    println!("{separator}");

    match &report.pending {
        Some(counter) => println!(
            "pending:   {} since {}",
            counter.count,
            counter.reset_at.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("pending:   0 (counter not started)"),
    }
    let gate = if report.gate_open {
        "OPEN".yellow().bold()
    } else {
        "closed".green()
    };
    println!("gate:      {gate}");

    let sync = if report.sync_stale {
        format!("{} (stale)", report.last_sync_age).yellow()
    } else {
        report.last_sync_age.normal()
    };
    println!("last sync: {sync}");

    if let Some(err) = &report.mirror_error {
        println!("{}", format!("mirror:    unavailable ({err})").red());
    }
    println!("{separator}");

    if report.integration_branches.is_empty() {
        println!("No integration branches retained.");
        return;
    }

    let rows: Vec<BranchRow> = report
        .integration_branches
        .iter()
        .map(|b| BranchRow {
            name: b.name.clone(),
            created: b.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            age: b.age.clone(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!("Run 'spamsub branches prune' to remove old branches.");
}
