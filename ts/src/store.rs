use std::fs::{self, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::error::StoreError;
use crate::record::{Filter, Record, matches_all};

/// A SQLite-backed, JSON-encoded collection of `R`, mirrored to an
/// append-only JSONL log for crash recovery.
///
/// One `Store<R>` owns one table (`R::collection_name()`) and one JSONL
/// file (`<collection>.jsonl`) under `base_path`. Multiple `Store`s may
/// share a `base_path` (they use distinct tables/files); they may not
/// safely share a single sqlite file handle across processes without
/// external locking, matching the single-writer-per-process assumption
/// the rest of the engine makes.
pub struct Store<R: Record> {
    conn: Mutex<Connection>,
    jsonl_path: PathBuf,
    _marker: PhantomData<R>,
}

#[derive(Serialize)]
struct JsonlEntry<'a> {
    id: &'a str,
    updated_at: i64,
    data: &'a serde_json::Value,
}

impl<R: Record> Store<R> {
    /// Open (creating if absent) a store rooted at `base_path`.
    pub fn open(base_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = base_path.as_ref();
        fs::create_dir_all(base_path)?;

        let db_path = base_path.join("store.sqlite3");
        let conn = Connection::open(db_path)?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    updated_at INTEGER NOT NULL,
                    data TEXT NOT NULL
                )",
                R::collection_name()
            ),
            [],
        )?;

        let jsonl_path = base_path.join(format!("{}.jsonl", R::collection_name()));

        Ok(Self {
            conn: Mutex::new(conn),
            jsonl_path,
            _marker: PhantomData,
        })
    }

    /// Insert a new record. Fails with `Conflict` if the id already exists.
    pub fn create(&self, record: &R) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let json = serde_json::to_value(record)?;
        let rows = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (id, updated_at, data) VALUES (?1, ?2, ?3)",
                R::collection_name()
            ),
            params![record.id(), record.updated_at(), json.to_string()],
        )?;
        if rows == 0 {
            return Err(StoreError::Conflict(record.id().to_string()));
        }
        drop(conn);
        self.append_jsonl(record.id(), record.updated_at(), &json)?;
        Ok(())
    }

    /// Fetch by id.
    pub fn get(&self, id: &str) -> Result<Option<R>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let data: Option<String> = conn
            .query_row(
                &format!("SELECT data FROM {} WHERE id = ?1", R::collection_name()),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    /// Conditionally overwrite an existing record.
    ///
    /// Succeeds only if the stored `updated_at` is strictly less than
    /// `record.updated_at()` — the single-writer fencing the engine relies
    /// on for agent-record upserts (spec §4.1).
    pub fn update(&self, record: &R) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let json = serde_json::to_value(record)?;
        let rows = conn.execute(
            &format!(
                "UPDATE {} SET updated_at = ?2, data = ?3 WHERE id = ?1 AND updated_at < ?2",
                R::collection_name()
            ),
            params![record.id(), record.updated_at(), json.to_string()],
        )?;
        if rows == 0 {
            let exists: bool = conn
                .query_row(
                    &format!("SELECT 1 FROM {} WHERE id = ?1", R::collection_name()),
                    params![record.id()],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if exists {
                return Err(StoreError::Conflict(record.id().to_string()));
            }
            return Err(StoreError::NotFound(record.id().to_string()));
        }
        drop(conn);
        self.append_jsonl(record.id(), record.updated_at(), &json)?;
        Ok(())
    }

    /// Insert or overwrite, ignoring the `updated_at` fence. Used for
    /// idempotent worker writes keyed on a natural business key rather than
    /// a generated row id (spec §4.3's upsert-on-tuple requirement).
    pub fn upsert(&self, record: &R) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let json = serde_json::to_value(record)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, updated_at, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at, data = excluded.data
                 WHERE {}.updated_at <= excluded.updated_at",
                R::collection_name(),
                R::collection_name()
            ),
            params![record.id(), record.updated_at(), json.to_string()],
        )?;
        drop(conn);
        self.append_jsonl(record.id(), record.updated_at(), &json)?;
        Ok(())
    }

    /// List all records matching every filter (ANDed), unordered.
    pub fn list(&self, filters: &[Filter]) -> Result<Vec<R>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT data FROM {}", R::collection_name()))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            let data = row?;
            let record: R = serde_json::from_str(&data)?;
            if matches_all(filters, &record.indexed_fields()) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Delete by id. Returns whether a row was removed.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", R::collection_name()),
            params![id],
        )?;
        Ok(rows > 0)
    }

    /// Number of records in the collection.
    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", R::collection_name()), [], |r| r.get(0))?;
        Ok(n as usize)
    }

    fn append_jsonl(&self, id: &str, updated_at: i64, data: &serde_json::Value) -> Result<(), StoreError> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.jsonl_path)?;
        let entry = JsonlEntry { id, updated_at, data };
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        Ok(())
    }
}
