//! Error taxonomy for the bundler and bootstrapper.
//!
//! Every failure is fatal and propagates to the top level; nothing is
//! retried. The four categories mirror the four ways a build or
//! bootstrap can go wrong, so callers (and tests) can tell a stale
//! manifest apart from a broken target environment.

use thiserror::Error;

/// Fatal error categories raised by the bundler and bootstrapper.
///
/// These are carried inside `anyhow::Error` up to the binary, which
/// prints the full context chain and exits non-zero.
#[derive(Debug, Error)]
pub enum BundlerError {
    /// Unsupported (target, arch, ABI) combination.
    #[error("unsupported configuration: {0}")]
    Configuration(String),

    /// An artifact, download link, or metadata row could not be found.
    /// The dependency list is hand-curated, so a miss means the list
    /// is stale, not that a retry would help.
    #[error("lookup failed: {0}")]
    Lookup(String),

    /// The external pip invocation returned a non-zero exit status.
    #[error("install failed: {0}")]
    Install(String),

    /// A patch target (and its fallback) is missing, or the rewritten
    /// file could not be written back.
    #[error("patch failed: {0}")]
    Patch(String),
}
