//! Checksummed artifact fetching and upgrade-info interpretation.
//!
//! An upgrade's info payload arrives in one of three shapes:
//!
//! - empty — nothing to fetch; fatal when a download is required
//! - a bare URL with an embedded `checksum=sha256:<hex>` query parameter —
//!   fetched directly
//! - a JSON object `{"binaries": {"<os>/<arch>": "<url>", ...}}` — the entry
//!   matching the running platform is selected (`"any"` acts as a wildcard)
//!
//! Downloads are streamed to disk while being hashed; the digest is compared
//! against the URL's declared checksum before the artifact is used anywhere,
//! and the file is removed on mismatch. A URL without a checksum parameter
//! is rejected outright — an unverifiable download is a configuration error,
//! not a warning.

use crate::error::UpswitchError;
use anyhow::{Context, Result};
use futures::StreamExt;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const CHECKSUM_PARAM: &str = "checksum";
const SHA256_PREFIX: &str = "sha256:";
const ANY_PLATFORM: &str = "any";

/// The `{"binaries": ...}` document accepted as an info payload.
#[derive(Debug, Deserialize)]
struct BinaryMap {
    binaries: BTreeMap<String, String>,
}

/// The `os/arch` key describing the running platform, e.g. `linux/x86_64`.
pub fn platform_key() -> String {
    format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Interprets an upgrade's info payload into a single download URL.
///
/// # Errors
///
/// - [`UpswitchError::EmptyUpgradeInfo`] when there is nothing to fetch
/// - [`UpswitchError::NoPlatformBinary`] when a binaries map has no entry
///   for `platform` (and no `"any"` fallback)
/// - a parse error when the payload looks like JSON but is not a valid
///   binaries map
pub fn resolve_binary_url(plan: &str, info: &str, platform: &str) -> Result<String> {
    let doc = info.trim();
    if doc.is_empty() {
        return Err(UpswitchError::EmptyUpgradeInfo {
            plan: plan.to_string(),
        }
        .into());
    }

    if doc.starts_with('{') {
        let map: BinaryMap = serde_json::from_str(doc).with_context(|| {
            format!("upgrade \"{plan}\" carries an unparseable binaries map")
        })?;
        return map
            .binaries
            .get(platform)
            .or_else(|| map.binaries.get(ANY_PLATFORM))
            .cloned()
            .ok_or_else(|| {
                UpswitchError::NoPlatformBinary {
                    plan: plan.to_string(),
                    platform: platform.to_string(),
                }
                .into()
            });
    }

    Ok(doc.to_string())
}

/// A download URL split into the fetchable part and its declared digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksummedUrl {
    /// The URL to fetch, with the checksum parameter removed.
    pub url: reqwest::Url,
    /// The declared sha256 digest, lowercase hex.
    pub sha256: String,
}

/// Extracts the `checksum=sha256:<hex>` parameter from a URL.
pub fn parse_checksummed_url(raw: &str) -> Result<ChecksummedUrl> {
    let url = reqwest::Url::parse(raw).with_context(|| format!("invalid download url {raw:?}"))?;

    let mut sha256 = None;
    let mut remaining = Vec::new();
    for (key, value) in url.query_pairs() {
        if key == CHECKSUM_PARAM {
            sha256 = Some(value.into_owned());
        } else {
            remaining.push((key.into_owned(), value.into_owned()));
        }
    }

    let declared = sha256.ok_or_else(|| UpswitchError::MissingChecksum {
        url: raw.to_string(),
    })?;
    let hex_digest = declared
        .strip_prefix(SHA256_PREFIX)
        .ok_or_else(|| UpswitchError::MissingChecksum {
            url: raw.to_string(),
        })?
        .to_ascii_lowercase();
    hex::decode(&hex_digest)
        .with_context(|| format!("checksum in {raw:?} is not valid hex"))?;

    let mut url = url;
    if remaining.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(remaining);
    }

    Ok(ChecksummedUrl { url, sha256: hex_digest })
}

/// Downloads `raw_url` to `dest`, verifying the embedded checksum.
///
/// The body is hashed while streaming; on mismatch the file is removed and
/// [`UpswitchError::ChecksumMismatch`] is returned, so a bad download can
/// never be observed at `dest`.
pub async fn fetch_checked(raw_url: &str, dest: &Path) -> Result<()> {
    let ChecksummedUrl { url, sha256 } = parse_checksummed_url(raw_url)?;
    debug!(url = %url, dest = %dest.display(), "downloading upgrade artifact");

    let client = reqwest::Client::new();
    let response = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("failed to download {url}"))?
        .error_for_status()
        .with_context(|| format!("download of {url} failed"))?;

    let mut file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("failed to create {}", dest.display()))?;
    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("failed while reading body of {url}"))?;
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .with_context(|| format!("failed to write {}", dest.display()))?;
    }
    file.flush()
        .await
        .with_context(|| format!("failed to flush {}", dest.display()))?;
    drop(file);

    let actual = hex::encode(hasher.finalize());
    if actual != sha256 {
        let _ = tokio::fs::remove_file(dest).await;
        return Err(UpswitchError::ChecksumMismatch {
            url: raw_url.to_string(),
            expected: sha256,
            actual,
        }
        .into());
    }

    debug!(dest = %dest.display(), "checksum verified");
    Ok(())
}
