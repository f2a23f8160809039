//! Per-Symbol Blob Storage
//!
//! One SQLite file per trading symbol, holding three tables:
//! - `candles`: `start_of_day_sec -> compressed day-of-candles blob`
//! - `ticks`:   `start_of_hour_sec -> compressed hour-of-ticks blob`
//! - `meta_data`: named string values (symbol name, digits, feed source)
//!
//! Batches commit atomically inside a single `BEGIN IMMEDIATE` transaction.
//! Transient `SQLITE_BUSY` failures are retried with a short sleep until the
//! owning engine raises the shutdown flag.

use crate::error::StorageError;
use crate::time::{SECS_PER_DAY, SECS_PER_HOUR};
use crate::types::MetadataKey;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const STORAGE_SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS candles (
    key   INTEGER PRIMARY KEY NOT NULL,
    value BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS ticks (
    key   INTEGER PRIMARY KEY NOT NULL,
    value BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS meta_data (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
) WITHOUT ROWID;
"#;

/// Which blob table an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    Candles,
    Ticks,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Candles => "candles",
            Table::Ticks => "ticks",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// SQLite busy handler timeout. Zero disables the handler; the explicit
    /// retry loop in the write path still applies.
    pub busy_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(0),
        }
    }
}

/// Durable `u64 -> bytes` store scoped to the candle and tick tables,
/// plus the metadata table.
pub struct QuoteStorage {
    conn: Mutex<Connection>,
    readonly: bool,
    shutdown: Arc<AtomicBool>,
}

impl QuoteStorage {
    /// Open or create the store at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        readonly: bool,
        config: &StorageConfig,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref();

        if !readonly {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StorageError::Fatal(e.to_string()))?;
                }
            }
        }

        let flags = if readonly {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };

        let conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(config.busy_timeout)?;
        if !readonly {
            conn.execute_batch(STORAGE_SCHEMA)?;
        }

        info!(path = %path.display(), readonly, "symbol storage opened");

        Ok(Self {
            conn: Mutex::new(conn),
            readonly,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(STORAGE_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            readonly: false,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shared flag bounding the busy-retry loops; the owning engine sets it
    /// on teardown so in-flight writes stop instead of spinning.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    // -------------------------------------------------------------------------
    // Blob reads
    // -------------------------------------------------------------------------

    pub fn read_candles(&self, key: u64) -> Result<Option<Vec<u8>>, StorageError> {
        self.read_blob(Table::Candles, key)
    }

    pub fn read_ticks(&self, key: u64) -> Result<Option<Vec<u8>>, StorageError> {
        self.read_blob(Table::Ticks, key)
    }

    fn read_blob(&self, table: Table, key: u64) -> Result<Option<Vec<u8>>, StorageError> {
        loop {
            let result = {
                let conn = self.conn.lock();
                conn.query_row(
                    &format!("SELECT value FROM {} WHERE key = ?1", table.name()),
                    params![key as i64],
                    |row| row.get::<_, Vec<u8>>(0),
                )
            };
            match result {
                Ok(blob) => return Ok(Some(blob)),
                Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                Err(e) => match StorageError::from(e) {
                    StorageError::Busy if !self.shutdown.load(Ordering::SeqCst) => {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    other => return Err(other),
                },
            }
        }
    }

    // -------------------------------------------------------------------------
    // Blob writes
    // -------------------------------------------------------------------------

    /// Commit a batch of candle blobs atomically (all-or-nothing).
    pub fn write_candles(&self, entries: &BTreeMap<u64, Vec<u8>>) -> Result<(), StorageError> {
        self.write_blobs(Table::Candles, entries)
    }

    /// Commit a batch of tick blobs atomically (all-or-nothing).
    pub fn write_ticks(&self, entries: &BTreeMap<u64, Vec<u8>>) -> Result<(), StorageError> {
        self.write_blobs(Table::Ticks, entries)
    }

    fn write_blobs(
        &self,
        table: Table,
        entries: &BTreeMap<u64, Vec<u8>>,
    ) -> Result<(), StorageError> {
        if self.readonly {
            return Err(StorageError::ReadOnly);
        }
        if entries.is_empty() {
            return Ok(());
        }

        loop {
            match self.try_write_blobs(table, entries) {
                Ok(()) => {
                    debug!(table = table.name(), count = entries.len(), "blob batch committed");
                    return Ok(());
                }
                Err(StorageError::Busy) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        warn!(table = table.name(), "write abandoned on shutdown");
                        return Err(StorageError::Busy);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_write_blobs(
        &self,
        table: Table,
        entries: &BTreeMap<u64, Vec<u8>>,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;

        let sql = format!(
            "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
            table.name()
        );
        for (key, blob) in entries {
            if let Err(e) = conn.execute(&sql, params![*key as i64, blob]) {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e.into());
            }
        }

        if let Err(e) = conn.execute_batch("COMMIT") {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e.into());
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Deletion
    // -------------------------------------------------------------------------

    pub fn remove_candles(&self, key: u64) -> Result<(), StorageError> {
        self.remove_blob(Table::Candles, key)
    }

    pub fn remove_ticks(&self, key: u64) -> Result<(), StorageError> {
        self.remove_blob(Table::Ticks, key)
    }

    fn remove_blob(&self, table: Table, key: u64) -> Result<(), StorageError> {
        if self.readonly {
            return Err(StorageError::ReadOnly);
        }
        let conn = self.conn.lock();
        conn.execute(
            &format!("DELETE FROM {} WHERE key = ?1", table.name()),
            params![key as i64],
        )?;
        Ok(())
    }

    /// Remove every blob and every metadata entry.
    pub fn remove_all(&self) -> Result<(), StorageError> {
        if self.readonly {
            return Err(StorageError::ReadOnly);
        }
        let conn = self.conn.lock();
        conn.execute_batch("DELETE FROM candles; DELETE FROM ticks; DELETE FROM meta_data;")?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Key range
    // -------------------------------------------------------------------------

    /// Covered date range as `[t_min, t_max)` in UTC seconds: the minimum
    /// unit key, and the maximum unit key pushed past its unit span.
    pub fn get_min_max_date(&self, use_ticks: bool) -> Result<Option<(u64, u64)>, StorageError> {
        let (table, span) = if use_ticks {
            (Table::Ticks, SECS_PER_HOUR)
        } else {
            (Table::Candles, SECS_PER_DAY)
        };

        let conn = self.conn.lock();
        let range: (Option<i64>, Option<i64>) = conn.query_row(
            &format!("SELECT MIN(key), MAX(key) FROM {}", table.name()),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        match range {
            (Some(min), Some(max)) => Ok(Some((min as u64, max as u64 + span))),
            _ => Ok(None),
        }
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    pub fn get_info_str(&self, key: MetadataKey) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT value FROM meta_data WHERE key = ?1",
            params![key.as_str()],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_info_int(&self, key: MetadataKey) -> Result<Option<i64>, StorageError> {
        Ok(self
            .get_info_str(key)?
            .and_then(|v| v.parse::<i64>().ok()))
    }

    pub fn set_info_str(&self, key: MetadataKey, value: &str) -> Result<(), StorageError> {
        if self.readonly {
            return Err(StorageError::ReadOnly);
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO meta_data (key, value) VALUES (?1, ?2)",
            params![key.as_str(), value],
        )?;
        Ok(())
    }

    pub fn set_info_int(&self, key: MetadataKey, value: i64) -> Result<(), StorageError> {
        self.set_info_str(key, &value.to_string())
    }
}

impl Drop for QuoteStorage {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
