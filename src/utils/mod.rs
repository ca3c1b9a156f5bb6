//! Cross-cutting filesystem utilities.
//!
//! Everything here is synchronous; async callers route through
//! `tokio::task::spawn_blocking` when the operation walks a directory tree.

pub mod fs;
