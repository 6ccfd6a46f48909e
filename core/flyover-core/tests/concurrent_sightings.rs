use flyover_core::{
    MemoryStore, RetryPolicy, SessionStore, SessionTracker, SqliteStore, CONTINUITY_THRESHOLD_MS,
};
use std::sync::{Arc, Barrier};
use std::thread;

const WRITERS: usize = 8;
const KEY: &str = "4ca7b5";

fn burst_policy() -> RetryPolicy {
    // Every writer commits once, so a writer can lose at most WRITERS - 1 races.
    RetryPolicy {
        max_attempts: (WRITERS as u32) * 2,
        backoff_step_ms: 1,
        backoff_max_ms: 5,
    }
}

fn fire_burst<S>(tracker: &Arc<SessionTracker<S>>, key: &str, times: Vec<i64>)
where
    S: SessionStore + 'static,
{
    let barrier = Arc::new(Barrier::new(times.len()));
    let handles: Vec<_> = times
        .into_iter()
        .map(|now| {
            let tracker = Arc::clone(tracker);
            let barrier = Arc::clone(&barrier);
            let key = key.to_string();
            thread::spawn(move || {
                barrier.wait();
                tracker
                    .record_sighting(&key, now, "burst payload")
                    .expect("record sighting")
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("writer thread panicked");
    }
}

fn assert_renewal_burst_keeps_one_session<S>(tracker: Arc<SessionTracker<S>>)
where
    S: SessionStore + 'static,
{
    let t0 = 10_000_000;
    tracker
        .record_sighting(KEY, t0, "Boeing 737-800")
        .expect("seed session");
    let before = tracker
        .get_session(KEY)
        .expect("get session")
        .expect("seeded");

    let times: Vec<i64> = (1..=WRITERS as i64).map(|i| t0 + i * 10_000).collect();
    let latest = *times.iter().max().expect("non-empty burst");
    assert!(latest - t0 <= CONTINUITY_THRESHOLD_MS);
    fire_burst(&tracker, KEY, times);

    let after = tracker
        .get_session(KEY)
        .expect("get session")
        .expect("still present");
    assert_eq!(tracker.store().count_for_key(KEY).expect("count"), 1);
    assert_eq!(after.sighting_count, before.sighting_count);
    assert_eq!(after.session_started_at, before.session_started_at);
    assert_eq!(after.attributes_snapshot, "Boeing 737-800");
    assert_eq!(after.last_seen_at, latest);
}

fn assert_first_sighting_race_creates_one_session<S>(tracker: Arc<SessionTracker<S>>)
where
    S: SessionStore + 'static,
{
    fire_burst(&tracker, "3c6444", vec![500_000; WRITERS]);

    assert_eq!(tracker.store().count_for_key("3c6444").expect("count"), 1);
    let session = tracker
        .get_session("3c6444")
        .expect("get session")
        .expect("created");
    assert_eq!(session.sighting_count, 1);
    assert_eq!(session.previous_session_ended_at, 0);
    assert_eq!(session.session_started_at, 500_000);
}

#[test]
fn memory_store_renewal_burst_keeps_one_session() {
    let tracker = SessionTracker::with_retry_policy(MemoryStore::new(), burst_policy());
    assert_renewal_burst_keeps_one_session(Arc::new(tracker));
}

#[test]
fn memory_store_first_sighting_race_creates_one_session() {
    let tracker = SessionTracker::with_retry_policy(MemoryStore::new(), burst_policy());
    assert_first_sighting_race_creates_one_session(Arc::new(tracker));
}

#[test]
fn sqlite_store_renewal_burst_keeps_one_session() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let store = SqliteStore::new(temp_dir.path().join("sessions.db")).expect("store init");
    let tracker = SessionTracker::with_retry_policy(store, burst_policy());
    assert_renewal_burst_keeps_one_session(Arc::new(tracker));
}

#[test]
fn sqlite_store_first_sighting_race_creates_one_session() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let store = SqliteStore::new(temp_dir.path().join("sessions.db")).expect("store init");
    let tracker = SessionTracker::with_retry_policy(store, burst_policy());
    assert_first_sighting_race_creates_one_session(Arc::new(tracker));
}

#[test]
fn independent_keys_do_not_interfere() {
    let tracker = Arc::new(SessionTracker::with_retry_policy(
        MemoryStore::new(),
        burst_policy(),
    ));

    let handles: Vec<_> = (0..WRITERS)
        .map(|index| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                let key = format!("a{:05x}", index);
                // Three sessions per key: two rollovers separated by long gaps.
                for session in 0..3i64 {
                    let start = session * (CONTINUITY_THRESHOLD_MS * 4);
                    tracker.record_sighting(&key, start, "x").expect("open");
                    tracker
                        .record_sighting(&key, start + 30_000, "y")
                        .expect("renew");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread panicked");
    }

    for index in 0..WRITERS {
        let key = format!("a{:05x}", index);
        assert_eq!(tracker.get_sighting_count(&key).expect("count"), 3);
        assert_eq!(
            tracker.get_previous_session_end(&key).expect("prev end"),
            CONTINUITY_THRESHOLD_MS * 4 + 30_000
        );
    }
    assert_eq!(tracker.store().len().expect("len"), WRITERS);
}

#[test]
fn sqlite_sessions_survive_reopen() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let db_path = temp_dir.path().join("sessions.db");

    {
        let tracker = SessionTracker::new(SqliteStore::new(db_path.clone()).expect("store init"));
        tracker.record_sighting(KEY, 1_000, "Airbus A320").expect("first");
        tracker
            .record_sighting(KEY, 1_000 + CONTINUITY_THRESHOLD_MS + 1, "Airbus A321")
            .expect("rollover");
    }

    let reopened = SessionTracker::new(SqliteStore::new(db_path).expect("store reopen"));
    assert_eq!(reopened.get_sighting_count(KEY).expect("count"), 2);
    assert_eq!(reopened.get_previous_session_end(KEY).expect("prev end"), 1_000);
}
