//! `spamsub sync [--if-stale]`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use spamsub_daemon::request_sync;

use super::{home, via_daemon};

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Only pull when the last sync is older than `sync_interval_secs`.
    #[arg(long)]
    pub if_stale: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let if_stale = self.if_stale;

        let result = via_daemon(
            &home,
            |home| request_sync(home, if_stale),
            |engine| {
                let value = if if_stale {
                    serde_json::to_value(engine.check_sync_staleness().context("sync failed")?)?
                } else {
                    serde_json::to_value(engine.sync().context("sync failed")?)?
                };
                Ok(value)
            },
        )?;

        match result["status"].as_str() {
            Some("fresh") => println!(
                "· last sync {}; nothing to do",
                result["age"].as_str().unwrap_or("recently")
            ),
            Some("reconciled") => {
                println!(
                    "  previous sync: {}",
                    result["previous_age"].as_str().unwrap_or("never")
                );
                print_reconciliation(&result["reconciliation"]);
            }
            _ => print_reconciliation(&result),
        }
        Ok(())
    }
}

fn print_reconciliation(rec: &Value) {
    let added: Vec<&str> = rec["added"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    println!(
        "{} synced with upstream ({} listed, {} new locally)",
        "✓".green(),
        rec["remote_count"].as_u64().unwrap_or(0),
        added.len()
    );
    for address in added {
        println!("  +  {address}");
    }
}
