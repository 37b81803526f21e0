//! `spamsub init [--force]`

use anyhow::{Context, Result};
use clap::Args;

use spamsub_core::config;

use super::home;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config with defaults.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let (cfg, written) =
            config::init_at(&home, self.force).context("failed to initialise ~/.spamsub")?;
        let path = config::config_path_at(&home);

        if written {
            println!("✓ Wrote config to {}", path.display());
        } else {
            println!("Config already exists at {} (use --force to reset)", path.display());
        }
        println!("  repository: {}", cfg.repo_path.display());
        println!("  database:   {}", cfg.database_path.display());
        println!(
            "  upstream:   {}/{} ({})",
            cfg.upstream_owner, cfg.upstream_repo, cfg.trunk
        );
        Ok(())
    }
}
