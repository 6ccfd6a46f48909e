//! In-memory session store with optimistic concurrency.
//!
//! Each document carries a version. A transaction remembers the version of
//! every key it read and buffers its writes; `commit` applies them only if
//! none of those versions moved and no insert lands on an existing key.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;
use crate::session::Session;

use super::{SessionId, SessionStore, StoredSession, Transaction};

#[derive(Debug, Clone)]
struct VersionedDocument {
    version: u64,
    session: Session,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, VersionedDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, VersionedDocument>>, StoreError> {
        self.documents
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".to_string()))
    }
}

impl SessionStore for MemoryStore {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            store: self,
            reads: HashMap::new(),
            writes: HashMap::new(),
        }))
    }

    fn get(&self, key: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.lock()?.get(key).map(|doc| doc.session.clone()))
    }

    fn count_for_key(&self, key: &str) -> Result<usize, StoreError> {
        Ok(usize::from(self.lock()?.contains_key(key)))
    }
}

#[derive(Debug)]
enum PendingWrite {
    Update(Session),
    Insert(Session),
}

impl PendingWrite {
    fn session(&self) -> &Session {
        match self {
            PendingWrite::Update(session) | PendingWrite::Insert(session) => session,
        }
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    /// Key -> version observed at first read (`None` if the key was absent).
    reads: HashMap<String, Option<u64>>,
    writes: HashMap<String, PendingWrite>,
}

impl Transaction for MemoryTransaction<'_> {
    fn find_by_key(&mut self, key: &str) -> Result<Option<StoredSession>, StoreError> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(Some(StoredSession {
                id: SessionId::new(key),
                session: pending.session().clone(),
            }));
        }

        let store = self.store;
        let documents = store.lock()?;
        let document = documents.get(key);
        self.reads
            .entry(key.to_string())
            .or_insert_with(|| document.map(|doc| doc.version));

        Ok(document.map(|doc| StoredSession {
            id: SessionId::new(key),
            session: doc.session.clone(),
        }))
    }

    fn update(&mut self, id: &SessionId, session: &Session) -> Result<(), StoreError> {
        let write = match self.writes.remove(id.as_str()) {
            // Updating a document inserted by this transaction keeps it an insert.
            Some(PendingWrite::Insert(_)) => PendingWrite::Insert(session.clone()),
            _ => PendingWrite::Update(session.clone()),
        };
        self.writes.insert(id.as_str().to_string(), write);
        Ok(())
    }

    fn insert(&mut self, session: &Session) -> Result<SessionId, StoreError> {
        if self.writes.contains_key(&session.key) {
            return Err(StoreError::Aborted(format!(
                "document {} already written in this transaction",
                session.key
            )));
        }
        self.writes.insert(
            session.key.clone(),
            PendingWrite::Insert(session.clone()),
        );
        Ok(SessionId::new(session.key.clone()))
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            store,
            reads,
            writes,
        } = *self;
        let mut documents = store.lock()?;

        for (key, observed) in &reads {
            let current = documents.get(key).map(|doc| doc.version);
            if current != *observed {
                return Err(StoreError::Aborted(format!(
                    "document {} changed since it was read",
                    key
                )));
            }
        }

        for (key, write) in &writes {
            let exists = documents.contains_key(key);
            match write {
                PendingWrite::Insert(_) if exists => {
                    return Err(StoreError::Aborted(format!("document {} already exists", key)));
                }
                PendingWrite::Update(_) if !exists => {
                    return Err(StoreError::Aborted(format!("document {} no longer exists", key)));
                }
                _ => {}
            }
        }

        for (key, write) in writes {
            let session = match write {
                PendingWrite::Update(session) | PendingWrite::Insert(session) => session,
            };
            let version = documents.get(&key).map(|doc| doc.version + 1).unwrap_or(1);
            documents.insert(key, VersionedDocument { version, session });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(key: &str, count: u64) -> Session {
        Session {
            key: key.to_string(),
            sighting_count: count,
            last_seen_at: 1_000,
            session_started_at: 1_000,
            previous_session_ended_at: 0,
            attributes_snapshot: "unknown aircraft".to_string(),
        }
    }

    #[test]
    fn inserts_and_reads_back() {
        let store = MemoryStore::new();
        let mut txn = store.begin().expect("begin");
        assert!(txn.find_by_key("abc").expect("find").is_none());
        let id = txn.insert(&session("abc", 1)).expect("insert");
        txn.commit().expect("commit");

        assert_eq!(id.as_str(), "abc");
        assert_eq!(store.get("abc").expect("get"), Some(session("abc", 1)));
        assert_eq!(store.count_for_key("abc").expect("count"), 1);
        assert_eq!(store.len().expect("len"), 1);
    }

    #[test]
    fn dropped_transaction_discards_writes() {
        let store = MemoryStore::new();
        {
            let mut txn = store.begin().expect("begin");
            txn.insert(&session("abc", 1)).expect("insert");
        }
        assert!(store.is_empty().expect("is_empty"));
    }

    #[test]
    fn transaction_sees_its_own_writes() {
        let store = MemoryStore::new();
        let mut txn = store.begin().expect("begin");
        txn.insert(&session("abc", 1)).expect("insert");
        let found = txn.find_by_key("abc").expect("find").expect("own write");
        assert_eq!(found.session.sighting_count, 1);
    }

    #[test]
    fn concurrent_inserts_for_same_key_conflict() {
        let store = MemoryStore::new();

        let mut first = store.begin().expect("begin first");
        let mut second = store.begin().expect("begin second");
        assert!(first.find_by_key("abc").expect("find").is_none());
        assert!(second.find_by_key("abc").expect("find").is_none());
        first.insert(&session("abc", 1)).expect("insert first");
        second.insert(&session("abc", 1)).expect("insert second");

        first.commit().expect("first commit wins");
        let err = second.commit().expect_err("second commit conflicts");
        assert!(err.is_aborted());
        assert_eq!(store.count_for_key("abc").expect("count"), 1);
    }

    #[test]
    fn stale_read_aborts_update() {
        let store = MemoryStore::new();
        let mut seed = store.begin().expect("begin");
        seed.insert(&session("abc", 1)).expect("insert");
        seed.commit().expect("commit");

        let mut slow = store.begin().expect("begin slow");
        let stored = slow.find_by_key("abc").expect("find").expect("exists");

        let mut fast = store.begin().expect("begin fast");
        let fresh = fast.find_by_key("abc").expect("find").expect("exists");
        fast.update(&fresh.id, &session("abc", 2)).expect("update");
        fast.commit().expect("fast commit");

        slow.update(&stored.id, &session("abc", 5)).expect("update");
        assert!(slow.commit().expect_err("stale").is_aborted());
        assert_eq!(store.get("abc").expect("get").map(|s| s.sighting_count), Some(2));
    }
}
