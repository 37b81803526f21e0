//! `spamsub submit <address>`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use spamsub_core::validate_submission;
use spamsub_daemon::request_submit;

use super::{home, print_publication, via_daemon};

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Everything after the "@" of the spammer's mail address.
    pub address: String,
}

impl SubmitArgs {
    pub fn run(self) -> Result<()> {
        validate_submission(&self.address)?;
        let home = home()?;

        let raw = self.address.clone();
        let outcome = via_daemon(
            &home,
            |home| request_submit(home, &raw),
            |engine| {
                let outcome = engine
                    .submit(&raw)
                    .with_context(|| format!("failed to submit '{raw}'"))?;
                Ok(serde_json::to_value(outcome)?)
            },
        )?;

        let address = outcome["address"].as_str().unwrap_or(&self.address);
        if outcome["already_known"].as_bool() == Some(true) {
            println!("· {address} already known");
        } else {
            println!("{} {address} added", "✓".green());
        }
        if !outcome["publication"].is_null() {
            print_publication(&outcome["publication"]);
        }
        Ok(())
    }
}
