/// Embedded relational backend
///
/// One SQLite database holds the generic `kv_store` table plus the
/// purpose-built `rosters`, `students` and `pending_submissions` tables.
/// Every multi-row mutation runs inside an IMMEDIATE transaction.

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, ToSql, Transaction, TransactionBehavior};

use crate::config::StoreConfig;
use crate::storage::StorageAdapter;
use crate::{Error, Result};

pub struct SqliteStore {
    conn: Mutex<Connection>,
    chunk_size: usize,
}

impl SqliteStore {
    /// Open (or create) the database described by `config`
    pub fn open(config: &StoreConfig) -> Result<Self> {
        config.validate().map_err(Error::InvalidArgument)?;

        let conn = if config.in_memory {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open(&config.path)?
        };

        if config.enable_wal && !config.in_memory {
            let mode: String =
                conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            tracing::debug!(journal_mode = %mode, "Configured journal mode");
        }
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        initialize_schema(&conn)?;

        tracing::debug!(
            path = %config.path.display(),
            in_memory = config.in_memory,
            "Opened sqlite store"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            chunk_size: config.batch_chunk_size,
        })
    }

    /// Open an in-memory database with default settings
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&StoreConfig::in_memory())
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Lock the connection for a read or a single-statement write.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Run `f` inside one IMMEDIATE transaction.
    ///
    /// The transaction commits only if `f` returns `Ok`; any error rolls it
    /// back when the transaction handle is dropped.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv_store(
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rosters(
            class_id TEXT PRIMARY KEY,
            subject_name TEXT NOT NULL,
            subject_id TEXT,
            section TEXT NOT NULL,
            cached_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS students(
            id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            roll_no TEXT NOT NULL,
            beacon_id TEXT,
            batch INTEGER,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(class_id, id),
            FOREIGN KEY(class_id) REFERENCES rosters(class_id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order);

        CREATE TABLE IF NOT EXISTS pending_submissions(
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            slot_id TEXT NOT NULL,
            date TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pending_dedup ON pending_submissions(slot_id, date);
        CREATE INDEX IF NOT EXISTS idx_pending_created ON pending_submissions(created_at);",
    )?;
    Ok(())
}

/// `(?,?),(?,?),...` for `rows` rows of `width` parameters
fn placeholders(rows: usize, width: usize) -> String {
    let row = format!("({})", vec!["?"; width].join(","));
    vec![row; rows].join(",")
}

impl StorageAdapter for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT value FROM kv_store WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(Bytes::from(row.get::<_, Vec<u8>>(0)?))),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv_store(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value.as_ref()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
        Ok(())
    }

    fn get_all_keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM kv_store ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<Bytes>)>> {
        let mut found = std::collections::HashMap::with_capacity(keys.len());

        {
            let conn = self.conn.lock();
            for chunk in keys.chunks(self.chunk_size) {
                let sql = format!(
                    "SELECT key, value FROM kv_store WHERE key IN ({})",
                    vec!["?"; chunk.len()].join(",")
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?;
                for row in rows {
                    let (key, value) = row?;
                    found.insert(key, Bytes::from(value));
                }
            }
        }

        Ok(keys
            .iter()
            .map(|k| (k.clone(), found.get(k).cloned()))
            .collect())
    }

    fn multi_set(&self, pairs: Vec<(String, Bytes)>) -> Result<()> {
        for chunk in pairs.chunks(self.chunk_size) {
            self.transaction(|tx| {
                let sql = format!(
                    "INSERT OR REPLACE INTO kv_store(key, value) VALUES {}",
                    placeholders(chunk.len(), 2)
                );
                let blobs: Vec<&[u8]> = chunk.iter().map(|(_, v)| v.as_ref()).collect();
                let mut params: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * 2);
                for ((key, _), blob) in chunk.iter().zip(blobs.iter()) {
                    params.push(key);
                    params.push(blob);
                }
                tx.execute(&sql, params.as_slice())?;
                Ok(())
            })?;
        }

        tracing::debug!(pairs = pairs.len(), chunk = self.chunk_size, "Sqlite multi_set");
        Ok(())
    }

    fn multi_remove(&self, keys: &[String]) -> Result<()> {
        for chunk in keys.chunks(self.chunk_size) {
            self.transaction(|tx| {
                let sql = format!(
                    "DELETE FROM kv_store WHERE key IN ({})",
                    vec!["?"; chunk.len()].join(",")
                );
                tx.execute(&sql, rusqlite::params_from_iter(chunk.iter()))?;
                Ok(())
            })?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv_store", [])?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
