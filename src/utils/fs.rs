//! Filesystem helpers: recursive copy, atomic symlink replacement, and
//! executable-bit handling.
//!
//! The symlink swap is the only primitive here with an ordering contract: the
//! link is created under a temporary name in the destination directory and
//! then renamed over the final name, so readers observe either the old or the
//! new target, never a missing or half-written link.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Creates a directory and all parent directories if they don't exist.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

/// Recursively copies a directory tree.
///
/// Regular files and directories are copied; `fs::copy` carries permissions
/// with it. Symlinks and other special file types are skipped.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    ensure_dir(dst)?;

    for entry in
        fs::read_dir(src).with_context(|| format!("failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if file_type.is_dir() {
            copy_dir(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            fs::copy(&src_path, &dst_path).with_context(|| {
                format!(
                    "failed to copy file from {} to {}",
                    src_path.display(),
                    dst_path.display()
                )
            })?;
        }
        // Skip symlinks and other file types
    }

    Ok(())
}

/// Atomically points `link` at `target`.
///
/// A temporary link is created next to `link` and renamed into place;
/// `rename` replaces an existing symlink in one step.
pub fn atomic_symlink_swap(target: &Path, link: &Path) -> Result<()> {
    let parent = link
        .parent()
        .with_context(|| format!("link path {} has no parent directory", link.display()))?;
    let name = link
        .file_name()
        .with_context(|| format!("link path {} has no file name", link.display()))?
        .to_string_lossy();
    let tmp = parent.join(format!(".{}.swap-{}", name, std::process::id()));

    match fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to clear stale link {}", tmp.display()));
        }
    }

    symlink_dir(target, &tmp)
        .with_context(|| format!("failed to create link to {}", target.display()))?;
    fs::rename(&tmp, link).with_context(|| {
        format!("failed to move link into place at {}", link.display())
    })
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

/// Returns whether `path` is a file the current platform would execute.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

/// Returns whether `path` is a file the current platform would execute.
///
/// Windows has no executable bit; existence is the best available check.
#[cfg(windows)]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Sets the executable bits on `path`.
#[cfg(unix)]
pub fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to mark {} executable", path.display()))
}

/// Sets the executable bits on `path`. No-op on Windows.
#[cfg(windows)]
pub fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}
