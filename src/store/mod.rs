use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use thiserror::Error;

use crate::schema::Metric;

/// Persistence failure. The one error class the service surfaces as a hard
/// failure instead of a rejection; nothing in this pipeline retries it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// A per-day snapshot: metric key -> bucket label -> count.
pub type DayCounts = std::collections::BTreeMap<String, std::collections::BTreeMap<String, u64>>;

/// Durable aggregate counters keyed by (day, metric, bucket).
///
/// This is the only state the aggregation service holds. Rows are created
/// lazily at first increment and never deleted or decremented; no
/// per-submission record ever touches disk.
pub struct CounterStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl CounterStore {
    /// Opens (creating if absent) the counter database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=5000;
            CREATE TABLE IF NOT EXISTS agg_counts (
              day TEXT NOT NULL,
              metric TEXT NOT NULL,
              bucket TEXT NOT NULL,
              count INTEGER NOT NULL DEFAULT 0,
              PRIMARY KEY (day, metric, bucket)
            );
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Where this store persists, for the health endpoint.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically bumps one (day, metric, bucket) counter by one.
    ///
    /// A single upsert statement, never a read-then-write pair: concurrent
    /// callers hitting the same key must not lose an update.
    pub fn increment(&self, day: &str, metric: Metric, bucket: &str) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO agg_counts (day, metric, bucket, count)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT (day, metric, bucket)
             DO UPDATE SET count = count + 1",
            params![day, metric.key(), bucket],
        )?;
        Ok(())
    }

    /// Reads the current snapshot for one day.
    ///
    /// A day nothing was ever submitted for yields an empty map, not an
    /// error; the read path cannot tell "no data yet" from "state was lost".
    pub fn day_counts(&self, day: &str) -> Result<DayCounts, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT metric, bucket, count FROM agg_counts WHERE day = ?1")?;

        let mut out = DayCounts::new();
        let rows = stmt.query_map(params![day], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        for row in rows {
            let (metric, bucket, count) = row?;
            out.entry(metric)
                .or_default()
                .insert(bucket, count.max(0) as u64);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn open_temp() -> (tempfile::TempDir, CounterStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CounterStore::open(dir.path().join("counts.db")).expect("open store");
        (dir, store)
    }

    #[test]
    fn test_first_increment_creates_row_at_one() {
        let (_dir, store) = open_temp();
        store
            .increment("2024-06-01", Metric::Posture, "P2")
            .expect("increment");

        let counts = store.day_counts("2024-06-01").expect("query");
        assert_eq!(counts["P"]["P2"], 1);
    }

    #[test]
    fn test_repeat_increment_accumulates() {
        let (_dir, store) = open_temp();
        for _ in 0..3 {
            store
                .increment("2024-06-01", Metric::Breaks, "C0")
                .expect("increment");
        }

        let counts = store.day_counts("2024-06-01").expect("query");
        assert_eq!(counts["C"]["C0"], 3);
    }

    #[test]
    fn test_unknown_day_is_empty_not_error() {
        let (_dir, store) = open_temp();
        let counts = store.day_counts("1999-01-01").expect("query");
        assert!(counts.is_empty());
    }

    #[test]
    fn test_days_and_buckets_are_isolated() {
        let (_dir, store) = open_temp();
        store
            .increment("2024-06-01", Metric::Posture, "P1")
            .expect("increment");
        store
            .increment("2024-06-02", Metric::Posture, "P1")
            .expect("increment");
        store
            .increment("2024-06-01", Metric::Posture, "P4")
            .expect("increment");

        let first = store.day_counts("2024-06-01").expect("query");
        assert_eq!(first["P"]["P1"], 1);
        assert_eq!(first["P"]["P4"], 1);

        let second = store.day_counts("2024-06-02").expect("query");
        assert_eq!(second["P"]["P1"], 1);
        assert_eq!(second["P"].get("P4"), None);
    }

    #[test]
    fn test_query_is_idempotent() {
        let (_dir, store) = open_temp();
        store
            .increment("2024-06-01", Metric::LowLight, "L3")
            .expect("increment");

        let first = store.day_counts("2024-06-01").expect("query");
        let second = store.day_counts("2024-06-01").expect("query");
        assert_eq!(first, second);
    }

    #[test]
    fn test_counts_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("counts.db");

        {
            let store = CounterStore::open(&path).expect("open store");
            store
                .increment("2024-06-01", Metric::Brightness, "B1")
                .expect("increment");
        }

        let store = CounterStore::open(&path).expect("reopen store");
        let counts = store.day_counts("2024-06-01").expect("query");
        assert_eq!(counts["B"]["B1"], 1);
    }

    #[test]
    fn test_concurrent_increments_lose_nothing() {
        let (_dir, store) = open_temp();
        let store = Arc::new(store);

        let threads = 8;
        let per_thread = 25;
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..per_thread {
                        store
                            .increment("2024-06-01", Metric::Posture, "P0")
                            .expect("increment");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("thread join");
        }

        let counts = store.day_counts("2024-06-01").expect("query");
        assert_eq!(counts["P"]["P0"], (threads * per_thread) as u64);
    }
}
