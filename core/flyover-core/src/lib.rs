//! # flyover-core
//!
//! Session tracking for sporadic sightings of mobile entities (aircraft keyed
//! by transponder hex code).
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Callers block for a store round-trip.
//! - **Store-serialized**: Correctness under concurrent writers comes from the
//!   store's transactions, not from in-process locks.
//! - **Injected dependencies**: The store handle and the sighting time are passed in,
//!   so tests run against `MemoryStore` with a fixed clock.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use flyover_core::{MemoryStore, SessionTracker};
//!
//! let tracker = SessionTracker::new(MemoryStore::new());
//! tracker.record_sighting("4ca7b5", 0, "Boeing 737-800")?;
//! assert_eq!(tracker.get_sighting_count("4ca7b5")?, 1);
//! ```

pub mod config;
pub mod error;
pub mod session;
pub mod store;
pub mod tracker;

// Re-export commonly used items at crate root
pub use config::{load_config, FlyoverConfig};
pub use error::{ConfigError, Phase, Result, StoreError, TrackerError};
pub use session::{apply_sighting, Session, SessionChange, Timestamp, CONTINUITY_THRESHOLD_MS};
pub use store::{
    run_transaction, run_transaction_observed, MemoryStore, RetryPolicy, SessionId, SessionStore, SqliteStore,
    StoredSession, Transaction,
};
pub use tracker::{SessionTracker, SightingOutcome};
