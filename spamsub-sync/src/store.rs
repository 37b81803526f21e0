//! Record store: the known address set plus the two singleton counters.
//!
//! Backed by SQLite. Timestamps are stored as unix seconds. Every mutation
//! sequence of one orchestration step runs inside [`RecordStore::transaction`]
//! and commits atomically or not at all. Nothing is cached in memory; every
//! read reflects committed state.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};

use spamsub_core::{Address, LastSyncMark, PendingCounter};

use crate::error::{io_err, SyncError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS addresses (
    address TEXT PRIMARY KEY NOT NULL
);
CREATE TABLE IF NOT EXISTS pending_counter (
    id       INTEGER PRIMARY KEY CHECK (id = 1),
    count    INTEGER NOT NULL CHECK (count >= 0),
    reset_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS sync_mark (
    id        INTEGER PRIMARY KEY CHECK (id = 1),
    synced_at INTEGER NOT NULL
);
";

/// Handle on the SQLite database.
#[derive(Debug)]
pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::with_connection(conn)
    }

    /// A private, empty store that vanishes with the handle.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, SyncError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Run `f` inside one transaction. Any error rolls everything back.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&StoreTx<'_>) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let tx = StoreTx {
            tx: self.conn.transaction()?,
        };
        let out = f(&tx)?;
        tx.tx.commit()?;
        Ok(out)
    }

    // -- reads ---------------------------------------------------------------

    pub fn exists(&self, address: &Address) -> Result<bool, SyncError> {
        exists(&self.conn, address)
    }

    /// Every known address, sorted.
    pub fn all_addresses(&self) -> Result<Vec<Address>, SyncError> {
        all_addresses(&self.conn)
    }

    pub fn address_count(&self) -> Result<u64, SyncError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM addresses", [], |row| row.get(0))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// `None` until the first submission initialises it.
    pub fn pending_counter(&self) -> Result<Option<PendingCounter>, SyncError> {
        pending_counter(&self.conn)
    }

    /// `None` until the first reconciliation completes.
    pub fn last_sync_mark(&self) -> Result<Option<LastSyncMark>, SyncError> {
        let mark = self
            .conn
            .query_row("SELECT synced_at FROM sync_mark WHERE id = 1", [], |row| {
                timestamp_column(row, 0)
            })
            .optional()?;
        Ok(mark.map(|synced_at| LastSyncMark { synced_at }))
    }

    // -- single-step mutations -----------------------------------------------

    pub fn insert(&mut self, address: &Address) -> Result<(), SyncError> {
        self.transaction(|tx| tx.insert(address))
    }

    pub fn insert_many<'a>(
        &mut self,
        addresses: impl IntoIterator<Item = &'a Address>,
    ) -> Result<usize, SyncError> {
        self.transaction(|tx| tx.insert_many(addresses))
    }

    pub fn increment_pending_counter(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<PendingCounter, SyncError> {
        self.transaction(|tx| tx.increment_pending_counter(now))
    }

    pub fn reset_pending_counter(&mut self, now: DateTime<Utc>) -> Result<PendingCounter, SyncError> {
        self.transaction(|tx| tx.reset_pending_counter(now))
    }

    pub fn set_last_sync_mark(&mut self, now: DateTime<Utc>) -> Result<LastSyncMark, SyncError> {
        self.transaction(|tx| tx.set_last_sync_mark(now))
    }
}

// ---------------------------------------------------------------------------
// StoreTx
// ---------------------------------------------------------------------------

/// Store operations bound to an open transaction.
pub struct StoreTx<'a> {
    tx: Transaction<'a>,
}

impl StoreTx<'_> {
    pub fn exists(&self, address: &Address) -> Result<bool, SyncError> {
        exists(&self.tx, address)
    }

    pub fn all_addresses(&self) -> Result<Vec<Address>, SyncError> {
        all_addresses(&self.tx)
    }

    /// Fails with [`SyncError::DuplicateAddress`] if `address` is already known.
    pub fn insert(&self, address: &Address) -> Result<(), SyncError> {
        match self
            .tx
            .execute("INSERT INTO addresses (address) VALUES (?1)", params![address.as_str()])
        {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(SyncError::DuplicateAddress(address.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Insert each address; returns how many were written. Empty input is a
    /// no-op.
    pub fn insert_many<'a>(
        &self,
        addresses: impl IntoIterator<Item = &'a Address>,
    ) -> Result<usize, SyncError> {
        let mut written = 0;
        for address in addresses {
            self.insert(address)?;
            written += 1;
        }
        Ok(written)
    }

    /// The counter, creating it as `(0, now)` on first use.
    pub fn pending_counter_or_init(&self, now: DateTime<Utc>) -> Result<PendingCounter, SyncError> {
        self.tx.execute(
            "INSERT OR IGNORE INTO pending_counter (id, count, reset_at) VALUES (1, 0, ?1)",
            params![now.timestamp()],
        )?;
        pending_counter(&self.tx)?.ok_or(SyncError::Store(rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn increment_pending_counter(&self, now: DateTime<Utc>) -> Result<PendingCounter, SyncError> {
        self.pending_counter_or_init(now)?;
        self.tx
            .execute("UPDATE pending_counter SET count = count + 1 WHERE id = 1", [])?;
        pending_counter(&self.tx)?.ok_or(SyncError::Store(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Set the counter to `(0, now)`.
    pub fn reset_pending_counter(&self, now: DateTime<Utc>) -> Result<PendingCounter, SyncError> {
        self.tx.execute(
            "INSERT INTO pending_counter (id, count, reset_at) VALUES (1, 0, ?1)
             ON CONFLICT(id) DO UPDATE SET count = 0, reset_at = excluded.reset_at",
            params![now.timestamp()],
        )?;
        Ok(PendingCounter::fresh(truncate(now)))
    }

    /// Advance the sync mark to `now`. The mark never moves backwards; the
    /// stored value is returned.
    pub fn set_last_sync_mark(&self, now: DateTime<Utc>) -> Result<LastSyncMark, SyncError> {
        self.tx.execute(
            "INSERT INTO sync_mark (id, synced_at) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET synced_at = MAX(synced_at, excluded.synced_at)",
            params![now.timestamp()],
        )?;
        let synced_at = self
            .tx
            .query_row("SELECT synced_at FROM sync_mark WHERE id = 1", [], |row| {
                timestamp_column(row, 0)
            })?;
        Ok(LastSyncMark { synced_at })
    }
}

// ---------------------------------------------------------------------------
// Shared queries
// ---------------------------------------------------------------------------

fn exists(conn: &Connection, address: &Address) -> Result<bool, SyncError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM addresses WHERE address = ?1",
            params![address.as_str()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn all_addresses(conn: &Connection) -> Result<Vec<Address>, SyncError> {
    let mut stmt = conn.prepare_cached("SELECT address FROM addresses ORDER BY address")?;
    let rows = stmt.query_map([], |row| {
        let raw: String = row.get(0)?;
        Address::normalize(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn pending_counter(conn: &Connection) -> Result<Option<PendingCounter>, SyncError> {
    let counter = conn
        .query_row(
            "SELECT count, reset_at FROM pending_counter WHERE id = 1",
            [],
            |row| {
                let count: i64 = row.get(0)?;
                Ok(PendingCounter {
                    count: u32::try_from(count).unwrap_or(u32::MAX),
                    reset_at: timestamp_column(row, 1)?,
                })
            },
        )
        .optional()?;
    Ok(counter)
}

fn timestamp_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let secs: i64 = row.get(idx)?;
    Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp {secs} out of range").into(),
        )
    })
}

/// Drop sub-second precision, matching what the store keeps.
fn truncate(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(at.timestamp(), 0).single().unwrap_or(at)
}
