//! SQLite-backed persistence of process records.
//!
//! The schema evolves through an append-only map of migration scripts keyed
//! by the integer `user_version` pragma. On open, every script above the
//! current version runs inside an exclusive transaction and bumps the
//! version, so a store written by an older supervisor upgrades in place.
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use tracing::debug;

use crate::{error::StoreError, process::ProcessRecord};

const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE components(
            uid VARCHAR PRIMARY KEY,
            typeid VARCHAR NOT NULL,
            pid INT,
            executed_cmd VARCHAR,
            log VARCHAR,
            stdout VARCHAR,
            stderr VARCHAR,
            stdenv VARCHAR,
            started TIMESTAMP,
            started_by VARCHAR,
            stopped TIMESTAMP,
            stopped_by VARCHAR
        );",
    ),
    (2, "ALTER TABLE components ADD COLUMN last_operation VARCHAR;"),
];

const SELECT_COLUMNS: &str = "uid, typeid, pid, executed_cmd, log, stdout, stderr, \
                              stdenv, started, started_by, stopped, stopped_by, \
                              last_operation";

/// Persistent store of process records, keyed by uid.
pub struct StatusStore {
    conn: Connection,
}

fn timestamp_to_sql(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|t| t.to_rfc3339())
}

fn timestamp_from_sql(value: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| StoreError::Timestamp(raw))
        })
        .transpose()
}

fn path_to_sql(value: &Option<PathBuf>) -> Option<String> {
    value.as_ref().map(|p| p.to_string_lossy().into_owned())
}

impl StatusStore {
    /// Opens (and if necessary creates and migrates) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        // WAL plus a generous busy timeout lets readers coexist with the
        // writing supervisor.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.busy_timeout(Duration::from_secs(30))?;

        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let current: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        for (version, script) in MIGRATIONS {
            if *version > current {
                debug!(version, "applying status store migration");
                self.conn.execute_batch(&format!(
                    "BEGIN EXCLUSIVE;\n{script}\nPRAGMA user_version = {version};\nCOMMIT;"
                ))?;
            }
        }
        Ok(())
    }

    /// Returns the current schema version.
    pub fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    fn record_from_row(row: &Row<'_>) -> rusqlite::Result<(ProcessRecord, Option<String>, Option<String>)> {
        Ok((
            ProcessRecord {
                uid: row.get(0)?,
                typeid: row.get(1)?,
                pid: row.get::<_, Option<i64>>(2)?.map(|pid| pid as u32),
                executed_cmd: row.get(3)?,
                log: row.get::<_, Option<String>>(4)?.map(PathBuf::from),
                stdout: row.get::<_, Option<String>>(5)?.map(PathBuf::from),
                stderr: row.get::<_, Option<String>>(6)?.map(PathBuf::from),
                stdenv: row.get::<_, Option<String>>(7)?.map(PathBuf::from),
                started: None,
                started_by: row.get(9)?,
                stopped: None,
                stopped_by: row.get(11)?,
                last_operation: row.get(12)?,
            },
            row.get(8)?,
            row.get(10)?,
        ))
    }

    /// Loads every persisted record, keyed by uid.
    pub fn load(&self) -> Result<HashMap<String, ProcessRecord>, StoreError> {
        let mut statement = self
            .conn
            .prepare(&format!("SELECT {SELECT_COLUMNS} FROM components"))?;
        let rows = statement.query_map([], Self::record_from_row)?;

        let mut records = HashMap::new();
        for row in rows {
            let (mut record, started_raw, stopped_raw) = row?;
            record.started = timestamp_from_sql(started_raw)?;
            record.stopped = timestamp_from_sql(stopped_raw)?;
            records.insert(record.uid.clone(), record);
        }
        Ok(records)
    }

    /// Upserts a record by uid.
    pub fn save(&self, record: &ProcessRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO components(uid, typeid, pid, executed_cmd, log, \
             stdout, stderr, stdenv, started, started_by, stopped, stopped_by, \
             last_operation) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.uid,
                record.typeid,
                record.pid.map(|pid| pid as i64),
                record.executed_cmd,
                path_to_sql(&record.log),
                path_to_sql(&record.stdout),
                path_to_sql(&record.stderr),
                path_to_sql(&record.stdenv),
                timestamp_to_sql(record.started),
                record.started_by,
                timestamp_to_sql(record.stopped),
                record.stopped_by,
                record.last_operation,
            ],
        )?;
        Ok(())
    }

    /// Removes a record by uid.
    pub fn delete(&self, uid: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM components WHERE uid = ?1", params![uid])?;
        Ok(())
    }
}
