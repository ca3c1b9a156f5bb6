//! Command-line interface.
//!
//! Two commands:
//!
//! - `upswitch run [--] <args>...` — supervise the configured daemon. The
//!   trailing argument vector is handed to the child unchanged. All
//!   configuration flags are backed by environment variables, so a plain
//!   `upswitch run start --log_level=info` works with the usual
//!   `DAEMON_HOME`/`DAEMON_NAME` environment.
//! - `upswitch version` — print build metadata.
//!
//! Successful supervision is silent on the supervisor's part: the only
//! output is the child's own, passed through.

use crate::config::Config;
use crate::error::UpswitchError;
use crate::process;
use crate::version;
use anyhow::Result;
use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Top-level CLI definition.
#[derive(Debug, Parser)]
#[command(
    name = "upswitch",
    version,
    about = "Supervise a daemon and swap its binary when its logs signal an upgrade"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the configured daemon under upgrade supervision.
    Run(RunArgs),
    /// Print build metadata.
    Version,
}

/// Configuration for a supervision run.
///
/// Every flag falls back to an environment variable, which is the usual way
/// these are set on daemon hosts.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Root directory holding binaries, upgrades and backups.
    #[arg(long, env = "DAEMON_HOME", value_name = "DIR")]
    pub home: PathBuf,

    /// Name of the daemon executable inside each binary directory.
    #[arg(long, env = "DAEMON_NAME", value_name = "NAME")]
    pub name: String,

    /// Data directory to snapshot before each upgrade.
    #[arg(long, env = "DAEMON_DATA_DIR", value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Allow fetching missing upgrade binaries over the network.
    #[arg(
        long,
        env = "DAEMON_ALLOW_DOWNLOAD_BINARIES",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        default_value = "false",
        value_name = "BOOL"
    )]
    pub allow_download_binaries: bool,

    /// Respawn the daemon after a successful upgrade.
    #[arg(
        long,
        env = "DAEMON_RESTART_AFTER_UPGRADE",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        default_value = "false",
        value_name = "BOOL"
    )]
    pub restart_after_upgrade: bool,

    /// Arguments passed to the daemon unchanged.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    pub args: Vec<String>,
}

impl RunArgs {
    fn into_parts(self) -> (Config, Vec<String>) {
        let config = Config {
            home: self.home,
            name: self.name,
            data_dir: self.data_dir,
            allow_download_binaries: self.allow_download_binaries,
            restart_after_upgrade: self.restart_after_upgrade,
        };
        (config, self.args)
    }
}

impl Cli {
    /// Executes the parsed command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(args) => run(args).await,
            Commands::Version => {
                println!("{}", version::build_info());
                Ok(())
            }
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    if std::env::var_os(process::SUPERVISED_ENV).is_some() {
        return Err(UpswitchError::NestedSupervision.into());
    }

    let (config, daemon_args) = args.into_parts();
    config.validate()?;

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    process::supervise(&config, &daemon_args, &mut stdout, &mut stderr).await
}
