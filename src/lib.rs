//! upswitch — a supervisor for daemons that signal upgrades through their
//! logs.
//!
//! upswitch runs a long-lived child process and watches its stdout for an
//! embedded "upgrade needed" announcement. The child cannot be told to
//! upgrade; intent is inferred from what it logs, across plain-text, logfmt
//! and JSON logging formats. Once an announcement is confirmed, the
//! supervisor optionally snapshots the data directory, resolves (and, if
//! permitted, downloads) the new binary, atomically repoints the active
//! binary, and restarts.
//!
//! # Architecture
//!
//! - [`scanner`] — a pure two-phase state machine over log lines: a trigger
//!   line is captured, a later panic/consensus-failure line confirms it.
//! - [`process`] — spawns the child, duplicates stdout into a pass-through
//!   sink and the scanner, pumps stderr untouched, and races child exit
//!   against upgrade confirmation; also the outer restart loop.
//! - [`upgrade`] — maps a plan name to a runnable binary, installing into a
//!   staging directory and promoting with a single rename before the
//!   symlink swap.
//! - [`download`] — interprets upgrade info payloads and fetches artifacts
//!   with mandatory sha256 verification.
//! - [`backup`] — one idempotent data snapshot per plan, tracked by a
//!   completion marker.
//! - [`config`] — the read-only configuration and on-disk layout.
//!
//! # Example
//!
//! ```no_run
//! use upswitch::{Config, process};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut config = Config::new("/srv/mychain", "mychaind");
//! config.restart_after_upgrade = true;
//! config.validate()?;
//!
//! let args = vec!["start".to_string()];
//! let mut stdout = tokio::io::stdout();
//! let mut stderr = tokio::io::stderr();
//! process::supervise(&config, &args, &mut stdout, &mut stderr).await?;
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod process;
pub mod scanner;
pub mod upgrade;
pub mod utils;
pub mod version;

pub use config::Config;
pub use error::UpswitchError;
pub use scanner::{ScannerState, UpgradeInfo, UpgradeScanner};
