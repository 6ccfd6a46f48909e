//! SQLite persistence for session documents.
//!
//! One row per key (`key` is the primary key). Each transaction opens its own
//! connection and takes the write lock up front with `BEGIN IMMEDIATE`, so the
//! lookup and the write see the same snapshot. Lock contention past the busy
//! timeout and primary-key collisions surface as `StoreError::Aborted`.

use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::StoreError;
use crate::session::Session;

use super::{SessionId, SessionStore, StoredSession, Transaction};

const BUSY_TIMEOUT_MS: i64 = 5000;

const SELECT_SESSION: &str = "SELECT key, sighting_count, last_seen_at, session_started_at, \
                                     previous_session_ended_at, attributes_snapshot \
                              FROM sessions WHERE key = ?1";

pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS sessions (
                    key TEXT PRIMARY KEY,
                    sighting_count INTEGER NOT NULL,
                    last_seen_at INTEGER NOT NULL,
                    session_started_at INTEGER NOT NULL,
                    previous_session_ended_at INTEGER NOT NULL DEFAULT 0,
                    attributes_snapshot TEXT NOT NULL DEFAULT ''
                 );
                 COMMIT;",
            )
            .map_err(|err| unavailable("Failed to initialize schema", err))
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(|err| {
                StoreError::Unavailable(format!("Failed to create session data dir: {}", err))
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| unavailable("Failed to open sqlite db", err))?;

        conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)
            .map_err(|err| unavailable("Failed to set busy_timeout", err))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| classify("Failed to enable WAL", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| unavailable("Failed to set synchronous", err))?;

        Ok(conn)
    }
}

impl SessionStore for SqliteStore {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StoreError> {
        let conn = self.open()?;
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|err| classify("Failed to begin transaction", err))?;
        Ok(Box::new(SqliteTransaction {
            conn,
            finished: false,
        }))
    }

    fn get(&self, key: &str) -> Result<Option<Session>, StoreError> {
        self.with_connection(|conn| {
            let row = conn
                .query_row(SELECT_SESSION, params![key], read_row)
                .optional()
                .map_err(|err| unavailable("Failed to query session", err))?;
            row.map(RawSession::into_session).transpose()
        })
    }

    fn count_for_key(&self, key: &str) -> Result<usize, StoreError> {
        let count = self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE key = ?1",
                params![key],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|err| unavailable("Failed to count sessions", err))
        })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

struct SqliteTransaction {
    conn: Connection,
    finished: bool,
}

impl Transaction for SqliteTransaction {
    fn find_by_key(&mut self, key: &str) -> Result<Option<StoredSession>, StoreError> {
        let row = self
            .conn
            .query_row(SELECT_SESSION, params![key], read_row)
            .optional()
            .map_err(|err| classify("Failed to query session", err))?;

        match row {
            Some(raw) => {
                let session = raw.into_session()?;
                Ok(Some(StoredSession {
                    id: SessionId::new(session.key.clone()),
                    session,
                }))
            }
            None => Ok(None),
        }
    }

    fn update(&mut self, id: &SessionId, session: &Session) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE sessions SET \
                    sighting_count = ?2, \
                    last_seen_at = ?3, \
                    session_started_at = ?4, \
                    previous_session_ended_at = ?5, \
                    attributes_snapshot = ?6 \
                 WHERE key = ?1",
                params![
                    id.as_str(),
                    count_to_sql(session.sighting_count)?,
                    session.last_seen_at,
                    session.session_started_at,
                    session.previous_session_ended_at,
                    session.attributes_snapshot
                ],
            )
            .map_err(|err| classify("Failed to update session", err))?;

        if changed == 0 {
            return Err(StoreError::Aborted(format!("document {} no longer exists", id)));
        }
        Ok(())
    }

    fn insert(&mut self, session: &Session) -> Result<SessionId, StoreError> {
        self.conn
            .execute(
                "INSERT INTO sessions \
                    (key, sighting_count, last_seen_at, session_started_at, previous_session_ended_at, attributes_snapshot) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.key,
                    count_to_sql(session.sighting_count)?,
                    session.last_seen_at,
                    session.session_started_at,
                    session.previous_session_ended_at,
                    session.attributes_snapshot
                ],
            )
            .map_err(|err| {
                if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
                    StoreError::Aborted(format!("document {} already exists", session.key))
                } else {
                    classify("Failed to insert session", err)
                }
            })?;
        Ok(SessionId::new(session.key.clone()))
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|err| classify("Failed to commit transaction", err))?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                debug!(error = %err, "Rollback of abandoned transaction failed");
            }
        }
    }
}

struct RawSession {
    key: String,
    sighting_count: i64,
    last_seen_at: i64,
    session_started_at: i64,
    previous_session_ended_at: i64,
    attributes_snapshot: String,
}

impl RawSession {
    fn into_session(self) -> Result<Session, StoreError> {
        let sighting_count = u64::try_from(self.sighting_count).map_err(|_| StoreError::Corrupt {
            key: self.key.clone(),
            details: format!("negative sighting_count {}", self.sighting_count),
        })?;
        Ok(Session {
            key: self.key,
            sighting_count,
            last_seen_at: self.last_seen_at,
            session_started_at: self.session_started_at,
            previous_session_ended_at: self.previous_session_ended_at,
            attributes_snapshot: self.attributes_snapshot,
        })
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawSession> {
    Ok(RawSession {
        key: row.get(0)?,
        sighting_count: row.get(1)?,
        last_seen_at: row.get(2)?,
        session_started_at: row.get(3)?,
        previous_session_ended_at: row.get(4)?,
        attributes_snapshot: row.get(5)?,
    })
}

fn count_to_sql(count: u64) -> Result<i64, StoreError> {
    i64::try_from(count)
        .map_err(|_| StoreError::Unavailable(format!("sighting_count {} overflows sqlite", count)))
}

/// Lock contention is a conflict the runner can retry; anything else is fatal.
fn classify(context: &str, err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            StoreError::Aborted(format!("{}: {}", context, err))
        }
        _ => unavailable(context, err),
    }
}

fn unavailable(context: &str, err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(format!("{}: {}", context, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(key: &str, count: u64, last_seen_at: i64) -> Session {
        Session {
            key: key.to_string(),
            sighting_count: count,
            last_seen_at,
            session_started_at: last_seen_at,
            previous_session_ended_at: 0,
            attributes_snapshot: "Boeing 737-800".to_string(),
        }
    }

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = SqliteStore::new(temp_dir.path().join("sessions.db")).expect("store init");
        (temp_dir, store)
    }

    #[test]
    fn schema_includes_sessions_table() {
        let (_temp_dir, store) = temp_store();
        let columns = store
            .with_connection(|conn| {
                let mut stmt = conn
                    .prepare("PRAGMA table_info(sessions)")
                    .map_err(|err| unavailable("prepare", err))?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(1))
                    .map_err(|err| unavailable("query", err))?;
                let mut columns = Vec::new();
                for row in rows {
                    columns.push(row.map_err(|err| unavailable("row", err))?);
                }
                Ok(columns)
            })
            .expect("read schema");

        assert_eq!(
            columns,
            vec![
                "key",
                "sighting_count",
                "last_seen_at",
                "session_started_at",
                "previous_session_ended_at",
                "attributes_snapshot"
            ]
        );
    }

    #[test]
    fn inserts_updates_and_fetches_sessions() {
        let (_temp_dir, store) = temp_store();

        let mut txn = store.begin().expect("begin");
        assert!(txn.find_by_key("4ca7b5").expect("find").is_none());
        let id = txn.insert(&session("4ca7b5", 1, 1_000)).expect("insert");
        txn.commit().expect("commit");
        assert_eq!(id.as_str(), "4ca7b5");

        let mut txn = store.begin().expect("begin");
        let stored = txn.find_by_key("4ca7b5").expect("find").expect("exists");
        assert_eq!(stored.session, session("4ca7b5", 1, 1_000));
        txn.update(&stored.id, &session("4ca7b5", 2, 900_000))
            .expect("update");
        txn.commit().expect("commit");

        assert_eq!(
            store.get("4ca7b5").expect("get"),
            Some(session("4ca7b5", 2, 900_000))
        );
        assert_eq!(store.count_for_key("4ca7b5").expect("count"), 1);
        assert_eq!(store.count_for_key("missing").expect("count"), 0);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let (_temp_dir, store) = temp_store();
        {
            let mut txn = store.begin().expect("begin");
            txn.insert(&session("4ca7b5", 1, 1_000)).expect("insert");
        }
        assert!(store.get("4ca7b5").expect("get").is_none());
    }

    #[test]
    fn duplicate_insert_is_a_conflict() {
        let (_temp_dir, store) = temp_store();
        let mut txn = store.begin().expect("begin");
        txn.insert(&session("4ca7b5", 1, 1_000)).expect("insert");
        txn.commit().expect("commit");

        let mut txn = store.begin().expect("begin");
        let err = txn
            .insert(&session("4ca7b5", 1, 2_000))
            .expect_err("duplicate key");
        assert!(err.is_aborted());
    }

    #[test]
    fn update_of_missing_document_is_a_conflict() {
        let (_temp_dir, store) = temp_store();
        let mut txn = store.begin().expect("begin");
        let err = txn
            .update(&SessionId::new("ghost"), &session("ghost", 1, 1_000))
            .expect_err("missing row");
        assert!(err.is_aborted());
    }

    #[test]
    fn negative_count_is_reported_as_corrupt() {
        let (_temp_dir, store) = temp_store();
        store
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO sessions (key, sighting_count, last_seen_at, session_started_at) \
                     VALUES ('bad', -1, 0, 0)",
                    [],
                )
                .map_err(|err| unavailable("seed", err))
            })
            .expect("seed corrupt row");

        let err = store.get("bad").expect_err("corrupt row");
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
