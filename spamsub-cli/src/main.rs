//! Spamsub: keep a shared spammer list in sync with local submissions.
//!
//! # Usage
//!
//! ```text
//! spamsub init [--force]
//! spamsub submit <address>
//! spamsub sync [--if-stale]
//! spamsub publish
//! spamsub status [--json]
//! spamsub export [--output <path>]
//! spamsub branches list|prune [--older-than-hours N] [--remote]
//! spamsub daemon start|stop|status
//! ```
//!
//! `submit`, `sync` and `publish` go through the daemon when it is running so
//! that it stays the only writer; otherwise they run in-process.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    branches::BranchesCommand, daemon::DaemonCommand, export::ExportArgs, init::InitArgs,
    publish::PublishArgs, status::StatusArgs, submit::SubmitArgs, sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "spamsub",
    version,
    about = "Collect spammer addresses and publish them upstream as pull requests",
    long_about = None,
)]
struct Cli {
    /// Log engine activity to stderr (`RUST_LOG` overrides the level).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the default config to ~/.spamsub/config.yaml.
    Init(InitArgs),

    /// Record an address; may trigger a publication.
    Submit(SubmitArgs),

    /// Pull the upstream list into the local store.
    Sync(SyncArgs),

    /// Publish the local list as a pull request now.
    Publish(PublishArgs),

    /// Show store, counter and branch state.
    Status(StatusArgs),

    /// Render the list as the next publication would write it.
    Export(ExportArgs),

    /// Inspect or clean up integration branches.
    Branches {
        #[command(subcommand)]
        command: BranchesCommand,
    },

    /// Run or control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let daemon_start = matches!(
        cli.command,
        Commands::Daemon {
            command: DaemonCommand::Start
        }
    );
    if !daemon_start && (cli.verbose || std::env::var_os("RUST_LOG").is_some()) {
        init_logging(cli.verbose);
    }

    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Submit(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Publish(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Export(args) => args.run(),
        Commands::Branches { command } => commands::branches::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
