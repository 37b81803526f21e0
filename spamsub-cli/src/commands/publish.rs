//! `spamsub publish`: open a pull request regardless of the gate.

use anyhow::{bail, Context, Result};
use clap::Args;

use spamsub_daemon::request_publish;

use super::{home, print_publication, via_daemon};

#[derive(Args, Debug)]
pub struct PublishArgs {}

impl PublishArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let outcome = via_daemon(&home, request_publish, |engine| {
            Ok(serde_json::to_value(
                engine.publish().context("publication aborted")?,
            )?)
        })?;

        if !print_publication(&outcome) {
            bail!("publication attempt failed");
        }
        Ok(())
    }
}
