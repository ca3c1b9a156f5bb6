//! Pre-upgrade data snapshots.
//!
//! Each plan gets at most one backup attempt, tracked by a `.keep` marker
//! written only after the copy completes. The marker — not the copied data —
//! is the source of truth: deleting the snapshot later does not re-arm the
//! backup, and a crash mid-copy (no marker) re-arms it on the next attempt.

use crate::config::Config;
use crate::scanner::UpgradeInfo;
use crate::utils::fs as fsutil;
use anyhow::{Context, Result};
use tracing::{debug, info};

const BACKUP_STAMP: &str = ".keep";
const BACKUP_DATA_DIR: &str = "data";

/// Snapshots the configured data directory before the swap for `info.name`.
///
/// No-op when no data directory is configured (no marker is written either),
/// or when the plan's marker already exists.
pub async fn backup_data(cfg: &Config, info: &UpgradeInfo) -> Result<()> {
    let Some(data_dir) = cfg.data_dir.clone() else {
        debug!("no data directory configured, skipping backup");
        return Ok(());
    };

    let backup_dir = cfg.backup_dir(&info.name);
    let stamp = backup_dir.join(BACKUP_STAMP);
    if tokio::fs::try_exists(&stamp)
        .await
        .with_context(|| format!("failed to check backup marker {}", stamp.display()))?
    {
        debug!(plan = %info.name, "backup already taken for this plan");
        return Ok(());
    }

    info!(plan = %info.name, from = %data_dir.display(), "backing up data directory");
    tokio::fs::create_dir_all(&backup_dir)
        .await
        .with_context(|| format!("failed to create backup directory {}", backup_dir.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&backup_dir, std::fs::Permissions::from_mode(0o700))
            .await
            .with_context(|| {
                format!("failed to restrict backup directory {}", backup_dir.display())
            })?;
    }

    let dst = backup_dir.join(BACKUP_DATA_DIR);
    tokio::task::spawn_blocking(move || fsutil::copy_dir(&data_dir, &dst))
        .await
        .context("backup copy task failed")??;

    // Marker last: only a completed copy counts as an attempt.
    tokio::fs::write(&stamp, b"")
        .await
        .with_context(|| format!("failed to write backup marker {}", stamp.display()))?;
    Ok(())
}
