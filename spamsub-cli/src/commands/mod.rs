pub mod branches;
pub mod daemon;
pub mod export;
pub mod init;
pub mod publish;
pub mod status;
pub mod submit;
pub mod sync;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::Value;

use spamsub_daemon::DaemonError;
use spamsub_sync::{pipeline, pipeline::LiveEngine, RETRY_NOTICE};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn open_engine(home: &Path) -> Result<LiveEngine> {
    let (_, engine) = pipeline::open_engine_at(home)
        .context("failed to open the sync engine; run `spamsub init` first")?;
    Ok(engine)
}

/// Send a job to the running daemon and return its `result`; run `local`
/// in-process when no daemon is listening.
pub(crate) fn via_daemon<R, L>(home: &Path, remote: R, local: L) -> Result<Value>
where
    R: FnOnce(&Path) -> Result<Value, DaemonError>,
    L: FnOnce(&LiveEngine) -> Result<Value>,
{
    match remote(home) {
        Ok(data) => Ok(data.get("result").cloned().unwrap_or(Value::Null)),
        Err(DaemonError::DaemonNotRunning { .. }) => local(&open_engine(home)?),
        Err(err) => Err(err).context("daemon request failed"),
    }
}

/// Print a serialized publication outcome. Returns `false` for a failed attempt.
pub(crate) fn print_publication(outcome: &Value) -> bool {
    let branch = outcome["branch"].as_str().unwrap_or("-");
    match outcome["status"].as_str() {
        Some("published") => {
            let count = outcome["address_count"].as_u64().unwrap_or(0);
            let added = outcome["added"].as_array().map_or(0, Vec::len);
            println!(
                "{} published {count} addresses ({added} new upstream) from '{branch}'",
                "✓".green()
            );
            if let Some(url) = outcome["pull_request"]["html_url"].as_str() {
                println!("  pull request: {url}");
            }
            if outcome["branch_retained"].as_bool() == Some(true) {
                println!(
                    "  {}",
                    format!("branch '{branch}' could not be removed").yellow()
                );
            }
            true
        }
        Some("failed") => {
            let stage = outcome["stage"].as_str().unwrap_or("unknown");
            let reason = outcome["reason"].as_str().unwrap_or("");
            println!(
                "{}",
                format!("! publication failed at {stage}: {reason}").yellow()
            );
            if outcome["branch_retained"].as_bool() == Some(true) {
                println!("  branch '{branch}' kept for inspection");
            }
            println!("{}", RETRY_NOTICE.yellow());
            false
        }
        _ => true,
    }
}
