//! Binary resolution and the atomic swap of the active binary.
//!
//! On a confirmed upgrade the flow is:
//!
//! 1. validate the plan name (it comes from untrusted child logs and becomes
//!    a path component)
//! 2. if `upgrades/<plan>/bin/<name>` already exists, never fetch — a
//!    manually installed binary always wins
//! 3. otherwise, with downloads enabled, resolve the info payload to a URL,
//!    fetch it with checksum verification, and install it into a staging
//!    directory that is promoted to its final location with one `rename`
//! 4. repoint the `current` symlink at the plan's directory
//!
//! The repoint is the last step, and staging lives under the same
//! `upgrades/` root as the target so the promote is a same-filesystem
//! rename: at no observable point does the indirection select a partially
//! written directory. Any failure before the repoint leaves the previous
//! binary active.

use crate::config::Config;
use crate::download;
use crate::error::UpswitchError;
use crate::scanner::UpgradeInfo;
use crate::utils::fs as fsutil;
use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

const ARTIFACT_FILE: &str = "artifact";
const BIN_DIR: &str = "bin";
const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];

/// Makes the binary for a confirmed upgrade current.
///
/// Installs the binary first if needed (and permitted), then atomically
/// repoints the active-binary indirection. See the module docs for the
/// ordering guarantees.
pub async fn upgrade_binary(cfg: &Config, upgrade: &UpgradeInfo) -> Result<()> {
    validate_plan_name(&upgrade.name)?;

    let target_bin = cfg.upgrade_bin(&upgrade.name);
    if !target_bin.is_file() {
        if !cfg.allow_download_binaries {
            return Err(UpswitchError::BinaryMissing {
                plan: upgrade.name.clone(),
                path: target_bin,
            }
            .into());
        }
        download_and_install(cfg, upgrade).await?;
    }

    // Covers manually installed binaries that were unpacked without the
    // executable bit.
    fsutil::mark_executable(&target_bin)?;
    if !fsutil::is_executable(&target_bin) {
        return Err(UpswitchError::NotExecutable { path: target_bin }.into());
    }

    let target_dir = cfg.upgrade_dir(&upgrade.name);
    debug!(target = %target_dir.display(), "repointing current binary");
    fsutil::atomic_symlink_swap(&target_dir, &cfg.current_link())
        .with_context(|| format!("failed to activate {}", target_dir.display()))?;
    info!(plan = %upgrade.name, "binary upgrade complete");
    Ok(())
}

/// Rejects plan names that cannot be used safely as a path component.
fn validate_plan_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(UpswitchError::InvalidPlanName {
            name: name.to_string(),
        }
        .into())
    }
}

async fn download_and_install(cfg: &Config, upgrade: &UpgradeInfo) -> Result<()> {
    let url = download::resolve_binary_url(&upgrade.name, &upgrade.info, &download::platform_key())?;

    let upgrades_root = cfg.upgrades_root();
    fsutil::ensure_dir(&upgrades_root)?;
    let fetch_dir = tempfile::Builder::new()
        .prefix(".fetch-")
        .tempdir_in(&upgrades_root)
        .context("failed to create download directory")?;
    let artifact = fetch_dir.path().join(ARTIFACT_FILE);

    download::fetch_checked(&url, &artifact).await?;
    install_artifact(cfg, &upgrade.name, &artifact).await
}

/// Installs a verified artifact as the binary for `plan`.
///
/// A zip archive (detected by magic bytes) is expanded into the staging
/// directory; a `bin/<name>` inside the expansion is used as-is, and a bare
/// `<name>` at the expansion root is relocated under `bin/`. A non-archive
/// artifact is copied to `bin/<name>` directly. The staged tree is then
/// promoted to `upgrades/<plan>` with one rename.
async fn install_artifact(cfg: &Config, plan: &str, artifact: &Path) -> Result<()> {
    let upgrades_root = cfg.upgrades_root();
    fsutil::ensure_dir(&upgrades_root)?;
    let staging = tempfile::Builder::new()
        .prefix(&format!(".{plan}-"))
        .tempdir_in(&upgrades_root)
        .context("failed to create staging directory")?;

    let bin_dir = staging.path().join(BIN_DIR);
    let bin_path = bin_dir.join(&cfg.name);

    if is_zip(artifact)? {
        let (archive, dest) = (artifact.to_path_buf(), staging.path().to_path_buf());
        tokio::task::spawn_blocking(move || extract_zip(&archive, &dest))
            .await
            .context("archive extraction task failed")??;

        if !bin_path.is_file() {
            let root_bin = staging.path().join(&cfg.name);
            if root_bin.is_file() {
                std::fs::create_dir_all(&bin_dir).with_context(|| {
                    format!("failed to create {}", bin_dir.display())
                })?;
                std::fs::rename(&root_bin, &bin_path).with_context(|| {
                    format!("failed to move {} under bin/", root_bin.display())
                })?;
            } else {
                bail!(
                    "archive for upgrade \"{plan}\" does not contain a {:?} binary",
                    cfg.name
                );
            }
        }
    } else {
        std::fs::create_dir_all(&bin_dir)
            .with_context(|| format!("failed to create {}", bin_dir.display()))?;
        std::fs::copy(artifact, &bin_path).with_context(|| {
            format!("failed to place binary at {}", bin_path.display())
        })?;
    }

    fsutil::mark_executable(&bin_path)?;

    // Promote. A leftover partial directory from an interrupted manual
    // install can be discarded: the indirection has never pointed here.
    let target_dir = cfg.upgrade_dir(plan);
    if target_dir.exists() {
        std::fs::remove_dir_all(&target_dir)
            .with_context(|| format!("failed to clear {}", target_dir.display()))?;
    }
    std::fs::rename(staging.path(), &target_dir)
        .with_context(|| format!("failed to promote staged upgrade to {}", target_dir.display()))?;
    debug!(plan, dir = %target_dir.display(), "binary installed");
    Ok(())
}

fn is_zip(path: &Path) -> Result<bool> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == ZIP_MAGIC),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read {}", path.display()))
        }
    }
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file =
        File::open(archive).with_context(|| format!("failed to open {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("failed to read archive {}", archive.display()))?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .with_context(|| format!("failed to read archive entry {index}"))?;
        let Some(relative) = entry.enclosed_name() else {
            bail!("archive contains an unsafe path: {:?}", entry.name());
        };
        let out = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut target = File::create(&out)
            .with_context(|| format!("failed to create {}", out.display()))?;
        std::io::copy(&mut entry, &mut target)
            .with_context(|| format!("failed to extract {}", out.display()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out, std::fs::Permissions::from_mode(mode))
                .with_context(|| format!("failed to set permissions on {}", out.display()))?;
        }
    }
    Ok(())
}
