//! Child process supervision: spawn, tee, race, restart.
//!
//! Per invocation the supervisor runs two forwarding paths for the lifetime
//! of the child:
//!
//! - **stderr** is forwarded byte-for-byte and never scanned — upgrade
//!   notices arrive on stdout in this ecosystem.
//! - **stdout** is duplicated: every chunk is written through to the caller's
//!   sink unmodified, then split into lines and fed to a freshly constructed
//!   [`UpgradeScanner`]. A single sequential reader preserves ordering and
//!   lets a slow consumer backpressure the child through ordinary pipe
//!   semantics; nothing buffers unboundedly.
//!
//! [`launch_process`] resolves against whichever happens first: the scanner
//! confirming an upgrade, or stdout closing followed by child exit. On
//! confirmation it runs the backup manager and then the upgrade manager
//! before returning `Ok(true)`; the child is usually mid-panic at that point
//! and is reaped on drop.
//!
//! [`supervise`] is the outer loop: strictly sequential, one child at a
//! time, respawning only after a confirmed upgrade when
//! `restart_after_upgrade` is set.

use crate::backup;
use crate::config::Config;
use crate::error::UpswitchError;
use crate::scanner::{UpgradeInfo, UpgradeScanner};
use crate::upgrade;
use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info};

/// Environment marker set on every child so a daemon that execs the
/// supervisor again fails fast instead of nesting supervisors.
pub const SUPERVISED_ENV: &str = "UPSWITCH_SUPERVISED";

/// Lines longer than this are still forwarded but skipped for scanning; a
/// line of binary garbage must neither exhaust memory nor abort supervision.
const MAX_SCAN_LINE: usize = 1024 * 1024;

const READ_BUF_SIZE: usize = 8 * 1024;

/// Runs the supervision loop until the daemon exits on its own.
///
/// Each iteration spawns the currently active binary. After a confirmed
/// upgrade the loop respawns only when `restart_after_upgrade` is set;
/// otherwise the (already applied) upgrade takes effect on the next manual
/// start.
pub async fn supervise<O, E>(
    cfg: &Config,
    args: &[String],
    stdout: &mut O,
    stderr: &mut E,
) -> Result<()>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    loop {
        let needs_upgrade = launch_process(cfg, args, stdout, stderr).await?;
        if !needs_upgrade {
            return Ok(());
        }
        if !cfg.restart_after_upgrade {
            info!("upgrade applied; restarts are disabled, exiting");
            return Ok(());
        }
        info!("restarting after upgrade");
    }
}

/// Spawns the active binary once and watches it until exit or upgrade.
///
/// Returns `Ok(true)` when an upgrade was confirmed and applied (backup,
/// then binary swap), `Ok(false)` when the child exited cleanly with no
/// signal. A non-zero exit without an upgrade signal, a spawn failure, or an
/// I/O failure on either stream is an error.
pub async fn launch_process<O, E>(
    cfg: &Config,
    args: &[String],
    stdout: &mut O,
    stderr: &mut E,
) -> Result<bool>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let bin = cfg.current_bin()?;
    debug!(binary = %bin.display(), "launching daemon");

    let mut child = Command::new(&bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env(SUPERVISED_ENV, "1")
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {}", bin.display()))?;

    let child_stdout = child.stdout.take().context("child stdout was not captured")?;
    let mut child_stderr = child.stderr.take().context("child stderr was not captured")?;

    let scan = tee_and_scan(child_stdout, stdout);
    let pump = forward_bytes(&mut child_stderr, stderr);
    tokio::pin!(scan);
    tokio::pin!(pump);
    let mut stderr_done = false;

    loop {
        tokio::select! {
            scanned = &mut scan => {
                match scanned? {
                    Some(upgrade_info) => {
                        info!(plan = %upgrade_info.name, "upgrade confirmed by daemon logs");
                        backup::backup_data(cfg, &upgrade_info).await?;
                        upgrade::upgrade_binary(cfg, &upgrade_info).await?;
                        // The child is panicking its way down; kill_on_drop
                        // reaps it if it lingers.
                        return Ok(true);
                    }
                    None => {
                        // Finish the stderr pump before waiting: a child
                        // still writing to a full stderr pipe must not block
                        // against our wait().
                        if !stderr_done {
                            (&mut pump)
                                .await
                                .context("failed to forward daemon stderr")?;
                        }
                        let status = child
                            .wait()
                            .await
                            .context("failed to wait for daemon exit")?;
                        return if status.success() {
                            Ok(false)
                        } else {
                            Err(UpswitchError::ChildFailed { status }.into())
                        };
                    }
                }
            }
            copied = &mut pump, if !stderr_done => {
                copied.context("failed to forward daemon stderr")?;
                stderr_done = true;
            }
        }
    }
}

/// Forwards a stream byte-for-byte, flushing per chunk so child output is
/// not held back by sink buffering.
async fn forward_bytes<R, W>(reader: &mut R, sink: &mut W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        sink.write_all(&buf[..n]).await?;
        sink.flush().await?;
    }
}

/// Duplicates a stdout stream: raw bytes to `sink`, lines to a fresh
/// scanner. Resolves with the confirmed upgrade, or `None` at end of stream.
async fn tee_and_scan<R, W>(mut reader: R, sink: &mut W) -> Result<Option<UpgradeInfo>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut scanner = UpgradeScanner::new();
    let mut splitter = LineSplitter::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = reader
            .read(&mut buf)
            .await
            .context("failed to read daemon stdout")?;
        if n == 0 {
            // A trailing line without a newline still gets scanned.
            if let Some(line) = splitter.finish() {
                if let Some(found) = scanner.observe(&line) {
                    return Ok(Some(found));
                }
            }
            return Ok(None);
        }

        sink.write_all(&buf[..n])
            .await
            .context("failed to forward daemon stdout")?;
        sink.flush()
            .await
            .context("failed to flush stdout sink")?;
        for line in splitter.feed(&buf[..n]) {
            if let Some(found) = scanner.observe(&line) {
                return Ok(Some(found));
            }
        }
    }
}

/// Incremental line accumulator for the stdout tee.
///
/// Carries partial lines across read chunks, strips `\r\n`, decodes lossily
/// (scanning is text matching; forwarding is unaffected), and drops lines
/// past [`MAX_SCAN_LINE`] from scanning.
struct LineSplitter {
    buf: Vec<u8>,
    overflow: bool,
}

impl LineSplitter {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            overflow: false,
        }
    }

    /// Consumes a chunk, returning the lines completed by it.
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                if self.overflow {
                    self.overflow = false;
                } else {
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                    lines.push(String::from_utf8_lossy(&self.buf).into_owned());
                }
                self.buf.clear();
            } else if !self.overflow {
                self.buf.push(byte);
                if self.buf.len() > MAX_SCAN_LINE {
                    self.overflow = true;
                    self.buf.clear();
                }
            }
        }
        lines
    }

    /// Returns the trailing unterminated line, if any.
    fn finish(&mut self) -> Option<String> {
        let overflowed = std::mem::take(&mut self.overflow);
        if overflowed || self.buf.is_empty() {
            self.buf.clear();
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(line)
    }
}
