//! Transactional session storage.
//!
//! Documents are keyed by the session key itself, so two writers racing on a
//! brand-new key collide inside the store instead of both inserting. Stores
//! report write-write conflicts as `StoreError::Aborted`; `run_transaction`
//! re-runs the body a bounded number of times and never lets that variant out.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};
use std::cmp;
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::session::Session;

/// Identifier of a persisted session document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub id: SessionId,
    pub session: Session,
}

/// A single read-modify-write unit. Dropping without `commit` discards all writes.
pub trait Transaction {
    fn find_by_key(&mut self, key: &str) -> Result<Option<StoredSession>, StoreError>;

    fn update(&mut self, id: &SessionId, session: &Session) -> Result<(), StoreError>;

    fn insert(&mut self, session: &Session) -> Result<SessionId, StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

pub trait SessionStore: Send + Sync {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StoreError>;

    /// Snapshot read outside any transaction.
    fn get(&self, key: &str) -> Result<Option<Session>, StoreError>;

    /// Number of documents stored for `key`; at most one while the tracker owns writes.
    fn count_for_key(&self, key: &str) -> Result<usize, StoreError>;
}

impl<S: SessionStore + ?Sized> SessionStore for std::sync::Arc<S> {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StoreError> {
        (**self).begin()
    }

    fn get(&self, key: &str) -> Result<Option<Session>, StoreError> {
        (**self).get(key)
    }

    fn count_for_key(&self, key: &str) -> Result<usize, StoreError> {
        (**self).count_for_key(key)
    }
}

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BACKOFF_STEP_MS: u64 = 10;
const DEFAULT_BACKOFF_MAX_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_step_ms: DEFAULT_BACKOFF_STEP_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

impl RetryPolicy {
    /// Delay before re-running after `failed_attempts` conflicts.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let millis = self
            .backoff_step_ms
            .saturating_mul(u64::from(failed_attempts));
        Duration::from_millis(cmp::min(millis, self.backoff_max_ms))
    }
}

/// Runs `body` inside a fresh transaction and commits it, retrying on conflicts.
///
/// Exhausting `policy.max_attempts` yields `StoreError::Unavailable`.
pub fn run_transaction<S, T, F>(store: &S, policy: &RetryPolicy, body: F) -> Result<T, StoreError>
where
    S: SessionStore + ?Sized,
    F: FnMut(&mut dyn Transaction) -> Result<T, StoreError>,
{
    run_transaction_observed(store, policy, |_| {}, body)
}

/// Like `run_transaction`, calling `before_attempt(attempt)` ahead of every
/// `begin`, including the first.
pub fn run_transaction_observed<S, T, A, F>(
    store: &S,
    policy: &RetryPolicy,
    mut before_attempt: A,
    mut body: F,
) -> Result<T, StoreError>
where
    S: SessionStore + ?Sized,
    A: FnMut(u32),
    F: FnMut(&mut dyn Transaction) -> Result<T, StoreError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_conflict = String::new();

    for attempt in 1..=max_attempts {
        before_attempt(attempt);
        match attempt_once(store, &mut body) {
            Ok(value) => return Ok(value),
            Err(StoreError::Aborted(reason)) => {
                debug!(attempt, max_attempts, reason = %reason, "Transaction conflict; retrying");
                last_conflict = reason;
                if attempt < max_attempts {
                    thread::sleep(policy.backoff(attempt));
                }
            }
            Err(err) => return Err(err),
        }
    }

    warn!(
        max_attempts,
        reason = %last_conflict,
        "Transaction retry budget exhausted"
    );
    Err(StoreError::Unavailable(format!(
        "transaction conflicted {} times: {}",
        max_attempts, last_conflict
    )))
}

fn attempt_once<S, T, F>(store: &S, body: &mut F) -> Result<T, StoreError>
where
    S: SessionStore + ?Sized,
    F: FnMut(&mut dyn Transaction) -> Result<T, StoreError>,
{
    let mut txn = store.begin()?;
    let value = body(txn.as_mut())?;
    txn.commit()?;
    Ok(value)
}
