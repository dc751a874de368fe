// src/db.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;

pub fn unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as i64
}

pub fn open_db(path: &Path) -> Result<Connection, StorageError> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(Duration::from_millis(2000))?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS local_storage (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

pub fn resolve_storage_path() -> Result<PathBuf, StorageError> {
    let dir = dirs::data_dir()
        .ok_or(StorageError::NoDirectory("data"))?
        .join("ollachat");
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join("storage.sqlite3"))
}

/// Durable string key/value storage shared by every store in a context.
#[derive(Clone)]
pub struct LocalStorage {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStorage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = open_db(path)?;
        init_db(&conn)?;
        tracing::debug!(path = %path.display(), "Opened local storage");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional();

        match value {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read local storage");
                None
            }
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(|v| v == "true")
    }

    /// Writes are best-effort: a storage failure is logged, never surfaced,
    /// so the in-memory state stays authoritative.
    pub fn set(&self, key: &str, value: &str) {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO local_storage (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, unix_ms()],
        );
        if let Err(e) = result {
            tracing::warn!(key, error = %e, "Failed to write local storage");
        }
    }

    pub fn set_bool(&self, key: &str, value: bool) {
        self.set(key, if value { "true" } else { "false" });
    }

    pub fn remove(&self, key: &str) {
        let conn = self.conn.lock();
        if let Err(e) = conn.execute("DELETE FROM local_storage WHERE key = ?1", params![key]) {
            tracing::warn!(key, error = %e, "Failed to remove local storage key");
        }
    }
}
