//! Error types for flyover-core operations.
//!
//! `StoreError::Aborted` is the store's internal conflict signal. It is absorbed
//! by the transaction runner and never reaches `SessionTracker` callers.

use std::fmt;
use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// Store Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Failures reported by a `SessionStore` or one of its transactions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A concurrent writer touched the same document; the transaction must be re-run.
    #[error("Transaction aborted: {0}")]
    Aborted(String),

    /// The store could not be reached or gave up after its retry budget.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A persisted document could not be decoded into a session.
    #[error("Corrupt session document for {key}: {details}")]
    Corrupt { key: String, details: String },
}

impl StoreError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, StoreError::Aborted(_))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tracker Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Which half of the read-modify-write a store failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lookup,
    Write,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Lookup => f.write_str("lookup"),
            Phase::Write => f.write_str("write"),
        }
    }
}

/// Errors surfaced by `SessionTracker`.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Caller error; never retried.
    #[error("Invalid session key: key must be non-empty")]
    InvalidKey,

    /// The store failed after exhausting its own retries.
    #[error("Store unavailable during {phase} for {key}: {source}")]
    StoreUnavailable {
        key: String,
        phase: Phase,
        #[source]
        source: StoreError,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file unreadable: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration file malformed: {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Convenience type alias for tracker results.
pub type Result<T> = std::result::Result<T, TrackerError>;

