//! Error types for upswitch.
//!
//! Two layers are used throughout the crate, following the same split as the
//! rest of the codebase's error handling:
//!
//! 1. [`UpswitchError`] — strongly-typed variants for failures a caller (or an
//!    operator reading the final report) may want to distinguish: bad
//!    configuration, integrity violations, and child-process failures.
//! 2. `anyhow` context chains — every fallible I/O call is wrapped with
//!    `.context(...)` so the top-level report shows the full cause chain.
//!
//! All fatal variants abort the current supervision iteration and surface to
//! `main`, which prints the chain and exits non-zero. There is no automatic
//! retry: re-running a failed binary swap without operator review is riskier
//! than halting.

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// The typed error cases for supervisor operations.
///
/// Variants are grouped by the failure class they represent:
///
/// - **Configuration**: [`NestedSupervision`], [`BinaryMissing`],
///   [`EmptyUpgradeInfo`], [`NoPlatformBinary`], [`MissingChecksum`],
///   [`InvalidPlanName`], [`NotExecutable`]
/// - **Integrity**: [`ChecksumMismatch`]
/// - **Process**: [`ChildFailed`]
///
/// [`NestedSupervision`]: UpswitchError::NestedSupervision
/// [`BinaryMissing`]: UpswitchError::BinaryMissing
/// [`EmptyUpgradeInfo`]: UpswitchError::EmptyUpgradeInfo
/// [`NoPlatformBinary`]: UpswitchError::NoPlatformBinary
/// [`MissingChecksum`]: UpswitchError::MissingChecksum
/// [`InvalidPlanName`]: UpswitchError::InvalidPlanName
/// [`NotExecutable`]: UpswitchError::NotExecutable
/// [`ChecksumMismatch`]: UpswitchError::ChecksumMismatch
/// [`ChildFailed`]: UpswitchError::ChildFailed
#[derive(Error, Debug)]
pub enum UpswitchError {
    /// The supervisor was started from inside an already-supervised process.
    ///
    /// The child environment is marked so that a daemon which accidentally
    /// execs the supervisor again fails fast instead of stacking supervisors.
    #[error("already running under supervision; refusing to nest supervisors")]
    NestedSupervision,

    /// An upgrade requires a binary that is not installed, and downloads are
    /// disabled. The operator must install it manually.
    #[error(
        "binary for upgrade \"{plan}\" is not present at {path} and downloads are disabled; \
         install it manually or enable binary downloads"
    )]
    BinaryMissing {
        /// The upgrade plan name.
        plan: String,
        /// The path where the binary was expected.
        path: PathBuf,
    },

    /// Downloads are enabled but the upgrade carried no info payload, so
    /// there is nothing to fetch.
    #[error("upgrade \"{plan}\" carries no download info; nothing to fetch")]
    EmptyUpgradeInfo {
        /// The upgrade plan name.
        plan: String,
    },

    /// The upgrade's binaries map has no entry for the running platform.
    #[error("upgrade \"{plan}\" has no binary for platform {platform}")]
    NoPlatformBinary {
        /// The upgrade plan name.
        plan: String,
        /// The `os/arch` key that was looked up.
        platform: String,
    },

    /// A download URL did not embed a `checksum=sha256:<hex>` parameter.
    /// Unverified downloads are never installed.
    #[error("download url {url} carries no sha256 checksum; refusing an unverifiable download")]
    MissingChecksum {
        /// The offending URL.
        url: String,
    },

    /// The downloaded artifact did not match its declared checksum.
    #[error("checksum mismatch for {url}: expected sha256:{expected}, got sha256:{actual}")]
    ChecksumMismatch {
        /// The URL the artifact was fetched from.
        url: String,
        /// The hex digest declared in the URL.
        expected: String,
        /// The hex digest of the downloaded bytes.
        actual: String,
    },

    /// A plan name from the child's logs is not usable as a path component.
    #[error("upgrade name {name:?} is not a valid plan name")]
    InvalidPlanName {
        /// The rejected name.
        name: String,
    },

    /// A resolved binary exists but cannot be executed.
    #[error("binary {path} is not executable")]
    NotExecutable {
        /// The non-executable path.
        path: PathBuf,
    },

    /// The child exited with a non-zero status without signalling an upgrade.
    #[error("daemon exited with {status}")]
    ChildFailed {
        /// The child's exit status.
        status: ExitStatus,
    },
}
