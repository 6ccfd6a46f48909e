//! Session record and the continuity rule.
//!
//! A session is a run of sightings for one key with no gap longer than
//! `CONTINUITY_THRESHOLD_MS`. `apply_sighting` is pure; persistence and
//! concurrency live in `tracker` and `store`.

use serde::{Deserialize, Serialize};

/// Unix epoch milliseconds.
pub type Timestamp = i64;

/// Gaps up to and including this many milliseconds continue the open session.
pub const CONTINUITY_THRESHOLD_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    pub sighting_count: u64,
    pub last_seen_at: Timestamp,
    pub session_started_at: Timestamp,
    /// `last_seen_at` of the session closed by the latest rollover; 0 before the first one.
    pub previous_session_ended_at: Timestamp,
    pub attributes_snapshot: String,
}

impl Session {
    pub fn first_sighting(key: &str, now: Timestamp, attributes: &str) -> Self {
        Self {
            key: key.to_string(),
            sighting_count: 1,
            last_seen_at: now,
            session_started_at: now,
            previous_session_ended_at: 0,
            attributes_snapshot: attributes.to_string(),
        }
    }

    /// Milliseconds since the last merged sighting. Negative for out-of-order input.
    pub fn gap_to(&self, now: Timestamp) -> i64 {
        now.saturating_sub(self.last_seen_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    Created(Session),
    Renewed(Session),
    RolledOver(Session),
}

impl SessionChange {
    pub fn session(&self) -> &Session {
        match self {
            SessionChange::Created(session)
            | SessionChange::Renewed(session)
            | SessionChange::RolledOver(session) => session,
        }
    }

    pub fn into_session(self) -> Session {
        match self {
            SessionChange::Created(session)
            | SessionChange::Renewed(session)
            | SessionChange::RolledOver(session) => session,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionChange::Created(_) => "created",
            SessionChange::Renewed(_) => "renewed",
            SessionChange::RolledOver(_) => "rolled_over",
        }
    }
}

pub fn apply_sighting(
    current: Option<&Session>,
    key: &str,
    now: Timestamp,
    attributes: &str,
) -> SessionChange {
    let existing = match current {
        Some(existing) => existing,
        None => return SessionChange::Created(Session::first_sighting(key, now, attributes)),
    };

    if existing.gap_to(now) <= CONTINUITY_THRESHOLD_MS {
        // A late sighting must not move last_seen_at behind session_started_at.
        let mut renewed = existing.clone();
        renewed.last_seen_at = existing.last_seen_at.max(now);
        return SessionChange::Renewed(renewed);
    }

    SessionChange::RolledOver(Session {
        key: existing.key.clone(),
        sighting_count: existing.sighting_count.saturating_add(1),
        last_seen_at: now,
        session_started_at: now,
        previous_session_ended_at: existing.last_seen_at,
        attributes_snapshot: attributes.to_string(),
    })
}
