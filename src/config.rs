//! Supervisor configuration and the on-disk layout derived from it.
//!
//! `Config` is constructed once at startup (from env-backed CLI arguments)
//! and never mutated. Everything path-shaped is derived from two inputs: the
//! home directory and the daemon name.
//!
//! Layout under `<home>`:
//!
//! ```text
//! <home>/genesis/bin/<name>          initial binary
//! <home>/upgrades/<plan>/bin/<name>  per-plan upgrade binaries
//! <home>/current                     symlink to the active binary directory
//! <home>/backups/<plan>/data         pre-upgrade data snapshot
//! <home>/backups/<plan>/.keep        backup completion marker
//! ```
//!
//! The `current` symlink is the active-binary indirection: it is read before
//! every spawn and repointed only by the upgrade manager, with a lazy
//! initialization to the genesis directory on the very first read.

use crate::error::UpswitchError;
use crate::utils::fs as fsutil;
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

const GENESIS_DIR: &str = "genesis";
const UPGRADES_DIR: &str = "upgrades";
const BACKUPS_DIR: &str = "backups";
const CURRENT_LINK: &str = "current";
const BIN_DIR: &str = "bin";

/// Read-only supervisor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory holding binaries, upgrades and backups.
    pub home: PathBuf,
    /// Name of the daemon executable inside each binary directory.
    pub name: String,
    /// Data directory snapshotted before each upgrade, if configured.
    pub data_dir: Option<PathBuf>,
    /// Whether missing upgrade binaries may be fetched over the network.
    pub allow_download_binaries: bool,
    /// Whether the daemon is respawned after a successful upgrade.
    pub restart_after_upgrade: bool,
}

impl Config {
    /// Checks that the configuration can support a supervision run.
    ///
    /// The genesis binary itself is validated lazily by [`current_bin`]
    /// (after the first upgrade the indirection no longer points at it).
    ///
    /// [`current_bin`]: Config::current_bin
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("daemon name must not be empty");
        }
        if self.name.contains(['/', '\\']) {
            bail!("daemon name {:?} must not contain path separators", self.name);
        }
        if !self.home.is_dir() {
            bail!("home directory {} does not exist", self.home.display());
        }
        if let Some(data_dir) = &self.data_dir {
            if !data_dir.is_dir() {
                bail!("data directory {} does not exist", data_dir.display());
            }
        }
        Ok(())
    }

    /// Directory holding the genesis binary.
    pub fn genesis_dir(&self) -> PathBuf {
        self.home.join(GENESIS_DIR)
    }

    /// Path of the genesis binary.
    pub fn genesis_bin(&self) -> PathBuf {
        self.genesis_dir().join(BIN_DIR).join(&self.name)
    }

    /// Root of all per-plan upgrade directories.
    pub fn upgrades_root(&self) -> PathBuf {
        self.home.join(UPGRADES_DIR)
    }

    /// Directory holding the binary for an upgrade plan.
    pub fn upgrade_dir(&self, plan: &str) -> PathBuf {
        self.upgrades_root().join(plan)
    }

    /// Path of the binary for an upgrade plan.
    pub fn upgrade_bin(&self, plan: &str) -> PathBuf {
        self.upgrade_dir(plan).join(BIN_DIR).join(&self.name)
    }

    /// The active-binary indirection: a symlink selecting the current binary
    /// directory.
    pub fn current_link(&self) -> PathBuf {
        self.home.join(CURRENT_LINK)
    }

    /// Backup directory for an upgrade plan.
    pub fn backup_dir(&self, plan: &str) -> PathBuf {
        self.home.join(BACKUPS_DIR).join(plan)
    }

    /// Resolves the binary the supervisor should spawn right now.
    ///
    /// Reads the `current` symlink, initializing it to the genesis directory
    /// when it does not exist yet, and verifies the resolved file exists and
    /// is executable — the indirection must never hand out a partially
    /// installed binary.
    pub fn current_bin(&self) -> Result<PathBuf> {
        let link = self.current_link();
        let dir = match fs::read_link(&link) {
            Ok(target) if target.is_absolute() => target,
            Ok(target) => self.home.join(target),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let genesis = self.genesis_dir();
                debug!(target = %genesis.display(), "initializing current link to genesis");
                fsutil::atomic_symlink_swap(&genesis, &link)
                    .context("failed to initialize the current-binary link")?;
                genesis
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read current-binary link {}", link.display())
                });
            }
        };

        let bin = dir.join(BIN_DIR).join(&self.name);
        if !bin.is_file() {
            bail!("current binary {} does not exist", bin.display());
        }
        if !fsutil::is_executable(&bin) {
            return Err(UpswitchError::NotExecutable { path: bin }.into());
        }
        Ok(bin)
    }
}

/// Convenience for tests and callers that only need the mandatory fields.
impl Config {
    /// Builds a config with no data directory, downloads disabled and
    /// restarts disabled.
    pub fn new(home: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            home: home.into(),
            name: name.into(),
            data_dir: None,
            allow_download_binaries: false,
            restart_after_upgrade: false,
        }
    }
}
