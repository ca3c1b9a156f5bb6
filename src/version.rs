//! Build metadata reported by the `version` subcommand.
//!
//! The crate version comes from Cargo; commit and build date are injected at
//! build time through `UPSWITCH_BUILD_COMMIT` / `UPSWITCH_BUILD_DATE` and
//! fall back to `unknown` for local builds.

/// Binary name as published.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Crate version from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const COMMIT: Option<&str> = option_env!("UPSWITCH_BUILD_COMMIT");
const BUILT: Option<&str> = option_env!("UPSWITCH_BUILD_DATE");

/// Render the multi-line build report.
pub fn build_info() -> String {
    [
        format!("name    : {NAME}"),
        format!("version : {VERSION}"),
        format!("commit  : {}", COMMIT.unwrap_or("unknown")),
        format!("built   : {}", BUILT.unwrap_or("unknown")),
    ]
    .join("\n")
}
