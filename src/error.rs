//! Error types for relaypath-rs.
//!
//! This module defines the [`enum@Error`] enum representing every failure the
//! path selection core can report, and the [`Result`] alias used across the crate.
//!
//! # Error Categories
//!
//! ```text
//!   Error
//!   ├── EmptyCandidateSet      ◄── Selector called with nothing to choose from
//!   ├── NoEntryAvailable       ◄── Entry pool empty after fallback
//!   ├── NoMiddleAvailable      ◄── No middle candidate for a hop position
//!   ├── NoExitAvailable        ◄── Exit pool exhausted by the current path
//!   ├── Establish              ◄── Circuit collaborator failed or timed out
//!   ├── Exhausted              ◄── Retry budget spent (terminal)
//!   ├── Io                     ◄── File I/O failures
//!   ├── Config                 ◄── Invalid configuration
//!   ├── Snapshot               ◄── Snapshot file could not be parsed
//!   ├── Cache                  ◄── Snapshot cache corruption
//!   └── Validation             ◄── Invalid input data
//! ```
//!
//! # Recovery Guide
//!
//! [`RetryCoordinator`](crate::RetryCoordinator) spends an attempt on every
//! failure, whatever its kind. The "Retryable" column is what
//! [`Error::is_retryable`] reports, for callers running their own loop.
//!
//! | Error | Retryable | Recommended Action |
//! |-------|--------|-------------------|
//! | [`EmptyCandidateSet`](Error::EmptyCandidateSet) | Yes | Programmer error: filter before selecting |
//! | [`NoEntryAvailable`](Error::NoEntryAvailable) | Yes | Wait for a fresher snapshot |
//! | [`NoMiddleAvailable`](Error::NoMiddleAvailable) | Yes | Reduce hop count or refresh snapshot |
//! | [`NoExitAvailable`](Error::NoExitAvailable) | Yes | Refresh snapshot |
//! | [`Establish`](Error::Establish) | Yes | Check the controller |
//! | [`Exhausted`](Error::Exhausted) | No | Report to the user |
//! | [`Io`](Error::Io) | Yes | Check permissions, paths |
//! | [`Config`](Error::Config) | No | Fix configuration file |
//! | [`Snapshot`](Error::Snapshot) | Yes | Regenerate the snapshot |
//! | [`Cache`](Error::Cache) | Yes | Delete the cache file |
//! | [`Validation`](Error::Validation) | No | Fix input data |
//!
//! # Example
//!
//! ```rust
//! use relaypath::Error;
//!
//! fn describe(err: &Error) -> &'static str {
//!     match err {
//!         Error::Exhausted { .. } => "gave up",
//!         e if e.is_retryable() => "will retry",
//!         _ => "fatal",
//!     }
//! }
//!
//! assert_eq!(describe(&Error::NoExitAvailable), "will retry");
//! ```

use thiserror::Error;

/// Errors that can occur during relaypath-rs operations.
///
/// Path-construction variants ([`NoEntryAvailable`](Error::NoEntryAvailable),
/// [`NoMiddleAvailable`](Error::NoMiddleAvailable),
/// [`NoExitAvailable`](Error::NoExitAvailable)) describe a catalog that cannot
/// satisfy the role and diversity constraints. They are recoverable with a
/// different snapshot. Only [`Exhausted`](Error::Exhausted) is a definitive
/// failure.
#[derive(Debug, Error)]
pub enum Error {
    /// The weighted selector was called with an empty candidate set.
    ///
    /// Callers must check non-emptiness before selecting; seeing this error
    /// means a filter step was skipped.
    #[error("cannot select from an empty candidate set")]
    EmptyCandidateSet,

    /// No entry-capable node remained after classification fallback.
    #[error("no entry relay available")]
    NoEntryAvailable,

    /// No node could fill the middle hop at `position` (1-based).
    #[error("no middle relay available for hop {position}")]
    NoMiddleAvailable {
        /// Hop index being filled, counting the entry as hop 1.
        position: usize,
    },

    /// No exit-capable node remained once the path members were excluded.
    #[error("no exit relay available")]
    NoExitAvailable,

    /// The circuit establishment collaborator failed or timed out.
    #[error("circuit establishment failed: {0}")]
    Establish(String),

    /// Every attempt allowed by the retry budget failed.
    ///
    /// This is terminal and must be reported to the caller.
    #[error("could not establish a circuit after {attempts} attempts (last error: {last_error})")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Description of the error that ended the final attempt.
        last_error: String,
    },

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A snapshot document could not be parsed.
    #[error("snapshot parse error: {0}")]
    Snapshot(String),

    /// The on-disk snapshot cache is unreadable or could not be written.
    #[error("snapshot cache error: {0}")]
    Cache(String),

    /// Input validation error.
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Returns true if another attempt with a different path or snapshot may succeed.
    ///
    /// Advisory only: the retry coordinator does not consult it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::EmptyCandidateSet
                | Error::NoEntryAvailable
                | Error::NoMiddleAvailable { .. }
                | Error::NoExitAvailable
                | Error::Establish(_)
                | Error::Io(_)
                | Error::Snapshot(_)
                | Error::Cache(_)
        )
    }
}

/// Result type alias for relaypath-rs operations.
pub type Result<T> = std::result::Result<T, Error>;
