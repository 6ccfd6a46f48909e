//! Session tracker: folds sightings into per-key sessions.
//!
//! `record_sighting` runs lookup, continuity rule and write inside one store
//! transaction. Concurrent callers for the same key are serialized by the
//! store; there is no in-process lock.

use chrono::Utc;
use std::cell::Cell;
use tracing::{debug, error, info};

use crate::error::{Phase, Result, StoreError, TrackerError};
use crate::session::{apply_sighting, Session, SessionChange, Timestamp};
use crate::store::{run_transaction_observed, RetryPolicy, SessionId, SessionStore};

/// Result of one committed sighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SightingOutcome {
    pub id: SessionId,
    pub change: SessionChange,
}

impl SightingOutcome {
    pub fn session(&self) -> &Session {
        self.change.session()
    }
}

pub struct SessionTracker<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: SessionStore> SessionTracker<S> {
    pub fn new(store: S) -> Self {
        Self::with_retry_policy(store, RetryPolicy::default())
    }

    pub fn with_retry_policy(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Records a sighting of `key` observed at `now` (epoch millis).
    ///
    /// Creates the session on first sight, renews it when the gap since the
    /// last sighting is within the continuity threshold, and rolls it over
    /// otherwise. Returns the identifier of the written document.
    pub fn record_sighting(&self, key: &str, now: Timestamp, attributes: &str) -> Result<SessionId> {
        self.record(key, now, attributes).map(|outcome| outcome.id)
    }

    /// Same as `record_sighting`, stamped with the current wall-clock time.
    pub fn record_sighting_now(&self, key: &str, attributes: &str) -> Result<SessionId> {
        self.record_now(key, attributes).map(|outcome| outcome.id)
    }

    /// Records a sighting and returns the session exactly as this call committed it.
    pub fn record(&self, key: &str, now: Timestamp, attributes: &str) -> Result<SightingOutcome> {
        validate_key(key)?;

        let phase = Cell::new(Phase::Lookup);
        let outcome = run_transaction_observed(
            &self.store,
            &self.retry,
            |_attempt| phase.set(Phase::Lookup),
            |txn| {
                let existing = txn.find_by_key(key)?;
                let change = apply_sighting(
                    existing.as_ref().map(|stored| &stored.session),
                    key,
                    now,
                    attributes,
                );

                phase.set(Phase::Write);
                let id = match existing {
                    Some(stored) => {
                        txn.update(&stored.id, change.session())?;
                        stored.id
                    }
                    None => txn.insert(change.session())?,
                };
                Ok(SightingOutcome { id, change })
            },
        );

        match outcome {
            Ok(outcome) => {
                log_change(&outcome.id, &outcome.change);
                Ok(outcome)
            }
            Err(source) => Err(self.store_failure(key, phase.get(), source)),
        }
    }

    pub fn record_now(&self, key: &str, attributes: &str) -> Result<SightingOutcome> {
        self.record(key, Utc::now().timestamp_millis(), attributes)
    }

    pub fn get_session(&self, key: &str) -> Result<Option<Session>> {
        validate_key(key)?;
        self.store
            .get(key)
            .map_err(|source| self.store_failure(key, Phase::Lookup, source))
    }

    /// Sessions observed for `key`; 0 when the key was never seen.
    pub fn get_sighting_count(&self, key: &str) -> Result<u64> {
        Ok(self
            .get_session(key)?
            .map(|session| session.sighting_count)
            .unwrap_or(0))
    }

    /// End of the session before the current one; 0 when there was none.
    pub fn get_previous_session_end(&self, key: &str) -> Result<Timestamp> {
        Ok(self
            .get_session(key)?
            .map(|session| session.previous_session_ended_at)
            .unwrap_or(0))
    }

    fn store_failure(&self, key: &str, phase: Phase, source: StoreError) -> TrackerError {
        error!(key = %key, phase = %phase, error = %source, "Session store operation failed");
        TrackerError::StoreUnavailable {
            key: key.to_string(),
            phase,
            source,
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(TrackerError::InvalidKey);
    }
    Ok(())
}

fn log_change(id: &SessionId, change: &SessionChange) {
    let session = change.session();
    match change {
        SessionChange::Renewed(_) => debug!(
            session_id = %id,
            key = %session.key,
            last_seen_at = session.last_seen_at,
            "Session renewed"
        ),
        SessionChange::Created(_) | SessionChange::RolledOver(_) => info!(
            session_id = %id,
            key = %session.key,
            change = change.as_str(),
            sighting_count = session.sighting_count,
            previous_session_ended_at = session.previous_session_ended_at,
            attributes = %session.attributes_snapshot,
            "Session opened"
        ),
    }
}
