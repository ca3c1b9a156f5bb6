//! Two-phase upgrade detection over a daemon's log lines.
//!
//! The supervised daemon cannot be told to upgrade; intent is inferred from
//! its stdout. Detection is a small state machine with two phases:
//!
//! 1. **Trigger** — a line announcing `UPGRADE "<name>" NEEDED at height:
//!    <h>: <info>` moves the scanner from [`ScannerState::Initial`] to
//!    [`ScannerState::PendingConfirmation`], capturing the plan name and its
//!    opaque info payload.
//! 2. **Confirmation** — a later line containing `panic: UPGRADE` or
//!    `CONSENSUS FAILURE!!!` converts the pending capture into an actionable
//!    signal. The emitted [`UpgradeInfo`] is always the one captured at the
//!    trigger, never anything parsed from the confirming line.
//!
//! A line that both matches the trigger grammar and carries a confirmation
//! marker (the classic `panic: UPGRADE "x" NEEDED at ...` line) confirms
//! immediately.
//!
//! The announcement shows up in three textures, all recognized:
//!
//! - plain text: `UPGRADE "chain2" NEEDED at height: 49: <token>`
//! - logfmt-embedded: `err="UPGRADE \"chain2\" NEEDED at height: 49: ..."`
//!   (name quotes escaped once, info runs to the end of the field)
//! - JSON logs: `{"message":"UPGRADE \"chain2\" NEEDED at ..."}` (the
//!   `message`/`err` fields are extracted with serde and matched after
//!   unescaping)
//!
//! The transition function is pure — no I/O — so every grammar corner is
//! unit-testable. Stream plumbing lives in [`crate::process`].
//!
//! Scanner state is scoped to exactly one child invocation: a fresh scanner
//! is constructed per spawn, and the driving loop stops at the first emitted
//! signal. Reusing a scanner across spawns would leak a stale pending plan.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// Pre-filter substrings. Regex matching is roughly 20x the cost of two
/// `contains` probes, so the patterns only run on lines that carry both.
const UPGRADE_NEEDLE: &str = "UPGRADE ";
const NEEDED_NEEDLE: &str = " NEEDED at ";

const PANIC_MARKER: &str = "panic: UPGRADE";
const CONSENSUS_MARKER: &str = "CONSENSUS FAILURE!!!";

/// Plain announcement: name in bare quotes, info is one whitespace-free
/// token (which may itself be inline JSON or a URL).
fn plain_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"UPGRADE "(.*?)" NEEDED at height: (\d+):\s+(\S*)"#).expect("valid pattern")
    })
}

/// Announcement embedded in a quoted logfmt/JSON field: name quotes are
/// backslash-escaped once, and info runs to the end of the embedding field,
/// i.e. up to the next unescaped quote. The capture is unescaped afterwards.
///
/// This variant is deliberately not folded into the plain one: the two
/// differ in how info terminates (field quote vs whitespace), and a single
/// pattern cannot express both terminators.
fn escaped_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"UPGRADE \\"(.*?)\\" NEEDED at height: (\d+):\s+((?:[^"\\]|\\.)*)"#)
            .expect("valid pattern")
    })
}

/// Announcement inside an already-decoded JSON field: quotes are plain again
/// and info runs to the end of the field text.
fn field_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"UPGRADE "(.*?)" NEEDED at height: (\d+):\s+(.*)$"#).expect("valid pattern")
    })
}

/// The details captured from an upgrade announcement.
///
/// Produced at most once per child invocation. `info` is opaque at this
/// layer: empty, a checksummed URL, or a JSON binaries map — interpretation
/// belongs to [`crate::download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeInfo {
    /// The plan name, used to derive on-disk paths.
    pub name: String,
    /// The opaque info payload; empty is valid.
    pub info: String,
}

/// Scanner phase. See the module docs for the transition rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerState {
    /// No announcement seen yet.
    Initial,
    /// An announcement was captured and awaits a confirming line.
    PendingConfirmation(UpgradeInfo),
}

/// The two-phase upgrade scanner.
///
/// # Examples
///
/// ```
/// use upswitch::scanner::UpgradeScanner;
///
/// let mut scanner = UpgradeScanner::new();
/// assert!(scanner.observe(r#"UPGRADE "chain2" NEEDED at height: 49: "#).is_none());
/// let info = scanner.observe(r#"panic: UPGRADE "chain2" NEEDED at height: 49: "#).unwrap();
/// assert_eq!(info.name, "chain2");
/// assert_eq!(info.info, "");
/// ```
#[derive(Debug)]
pub struct UpgradeScanner {
    state: ScannerState,
}

impl Default for UpgradeScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl UpgradeScanner {
    /// Creates a scanner in [`ScannerState::Initial`].
    pub fn new() -> Self {
        Self {
            state: ScannerState::Initial,
        }
    }

    /// Current phase, mainly useful in tests.
    pub fn state(&self) -> &ScannerState {
        &self.state
    }

    /// Feeds one log line through the transition function.
    ///
    /// Returns `Some(info)` exactly when a pending announcement is confirmed;
    /// every other line returns `None`. Malformed or unrelated lines are
    /// absorbed — they never surface as errors. The driving loop must stop
    /// at the first `Some`.
    pub fn observe(&mut self, line: &str) -> Option<UpgradeInfo> {
        match &self.state {
            ScannerState::Initial => {
                if !(line.contains(UPGRADE_NEEDLE) && line.contains(NEEDED_NEEDLE)) {
                    return None;
                }
                // Both needles present, but the line may still be unrelated;
                // only a full grammar match changes state.
                let info = match_trigger(line)?;
                if is_confirmation(line) {
                    return Some(info);
                }
                self.state = ScannerState::PendingConfirmation(info);
                None
            }
            ScannerState::PendingConfirmation(info) => {
                if is_confirmation(line) {
                    Some(info.clone())
                } else {
                    None
                }
            }
        }
    }
}

fn is_confirmation(line: &str) -> bool {
    line.contains(PANIC_MARKER) || line.contains(CONSENSUS_MARKER)
}

/// The `message`/`err` pair carried by structured log lines. Everything else
/// in the object is ignored.
#[derive(Debug, Default, Deserialize)]
struct LogMessage {
    #[serde(default)]
    message: String,
    #[serde(default)]
    err: String,
}

/// Attempts to capture an announcement from one line, trying the JSON path
/// first and falling back to the raw-line patterns.
fn match_trigger(line: &str) -> Option<UpgradeInfo> {
    if let Some(span) = json_span(line) {
        if let Ok(log) = serde_json::from_str::<LogMessage>(span) {
            for field in [&log.message, &log.err] {
                if let Some(caps) = field_pattern().captures(field) {
                    return Some(UpgradeInfo {
                        name: caps[1].to_string(),
                        info: caps[3].trim().to_string(),
                    });
                }
            }
        }
        // A span that fails to parse, or parses but carries no upgrade text
        // in message/err, falls through to the raw-line patterns: the braces
        // may belong to an inline-JSON info payload rather than to the log
        // format itself.
    }

    if let Some(caps) = escaped_pattern().captures(line) {
        return Some(UpgradeInfo {
            name: caps[1].to_string(),
            info: unescape_field(caps[3].trim()),
        });
    }

    plain_pattern().captures(line).map(|caps| UpgradeInfo {
        name: caps[1].to_string(),
        info: caps[3].to_string(),
    })
}

/// The `{...}` span from the first `{` to the last `}`, if any.
fn json_span(line: &str) -> Option<&str> {
    let start = line.find('{')?;
    let end = line.rfind('}')?;
    (end > start).then(|| &line[start..=end])
}

/// Drops one layer of backslash escaping from a captured field.
fn unescape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
