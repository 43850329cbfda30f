use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::schema::types::{Mapping, TableDefinition};
use crate::store::history::AttemptStatus;

/// SQLite-backed control store: table definitions, their refresh status and
/// the refresh history.
pub struct Store {
    pub(crate) conn: Connection,
}

impl Store {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS table_metadata (
                table_name TEXT PRIMARY KEY,
                table_type TEXT NOT NULL,
                columns_json TEXT NOT NULL,
                data_source_url TEXT,
                refresh_interval INTEGER,
                mapping_json TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'NEW',
                last_refresh_success TEXT,
                last_refresh_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS refresh_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                table_name TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT NOT NULL,
                rows_affected INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_refresh_logs_table ON refresh_logs(table_name);
            CREATE INDEX IF NOT EXISTS idx_refresh_logs_status ON refresh_logs(status);",
        )?;
        Ok(())
    }

    /// Insert a new table definition. Fails on a duplicate name.
    pub fn insert_table(&self, def: &TableDefinition, now: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO table_metadata
                (table_name, table_type, columns_json, data_source_url, refresh_interval,
                 mapping_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                def.name,
                def.kind.as_str(),
                to_json(&def.columns)?,
                def.source_url,
                def.refresh_interval.map(|s| s as i64),
                to_json(&def.mapping)?,
                now,
            ],
        )?;
        Ok(())
    }

    /// Persist the mutable configuration (source url, interval, mapping) of a table.
    pub fn update_table_config(&self, def: &TableDefinition, now: &str) -> Result<usize, rusqlite::Error> {
        self.conn.execute(
            "UPDATE table_metadata
             SET data_source_url = ?2, refresh_interval = ?3, mapping_json = ?4, updated_at = ?5
             WHERE table_name = ?1",
            params![
                def.name,
                def.source_url,
                def.refresh_interval.map(|s| s as i64),
                to_json(&def.mapping)?,
                now,
            ],
        )
    }

    /// Record the outcome of the latest refresh on the table's metadata row.
    pub fn record_outcome(
        &self,
        table: &str,
        status: AttemptStatus,
        at: &str,
        error: Option<&str>,
    ) -> Result<usize, rusqlite::Error> {
        match status {
            AttemptStatus::Success => self.conn.execute(
                "UPDATE table_metadata
                 SET status = 'OK', last_refresh_success = ?2, last_refresh_error = NULL, updated_at = ?2
                 WHERE table_name = ?1",
                params![table, at],
            ),
            AttemptStatus::Failure => self.conn.execute(
                "UPDATE table_metadata
                 SET status = 'ERROR', last_refresh_error = ?2, updated_at = ?3
                 WHERE table_name = ?1",
                params![table, error, at],
            ),
        }
    }

    pub fn get_table(&self, name: &str) -> Result<Option<TableMetadataRow>, rusqlite::Error> {
        self.conn
            .query_row(
                &format!("SELECT {METADATA_COLUMNS} FROM table_metadata WHERE table_name = ?1"),
                params![name],
                metadata_from_row,
            )
            .optional()
    }

    pub fn list_tables(&self) -> Result<Vec<TableMetadataRow>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {METADATA_COLUMNS} FROM table_metadata ORDER BY created_at, table_name"
        ))?;
        let rows = stmt.query_map([], metadata_from_row)?;
        rows.collect()
    }

    /// Remove a table definition. Refresh history is left untouched.
    pub fn delete_table(&self, name: &str) -> Result<usize, rusqlite::Error> {
        self.conn.execute("DELETE FROM table_metadata WHERE table_name = ?1", params![name])
    }
}

const METADATA_COLUMNS: &str = "table_name, table_type, columns_json, data_source_url, \
     refresh_interval, mapping_json, status, last_refresh_success, last_refresh_error, \
     created_at, updated_at";

/// A `table_metadata` row: the definition plus its refresh bookkeeping.
#[derive(Debug, Clone)]
pub struct TableMetadataRow {
    pub definition: TableDefinition,
    /// `NEW`, `OK` or `ERROR`.
    pub status: String,
    pub last_refresh_success: Option<String>,
    pub last_refresh_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

fn metadata_from_row(row: &Row<'_>) -> Result<TableMetadataRow, rusqlite::Error> {
    let kind: String = row.get(1)?;
    let kind = kind
        .parse()
        .map_err(|e: String| conversion_error(1, e.into()))?;
    let columns_json: String = row.get(2)?;
    let mapping_json: String = row.get(5)?;
    let interval: Option<i64> = row.get(4)?;

    Ok(TableMetadataRow {
        definition: TableDefinition {
            name: row.get(0)?,
            kind,
            columns: serde_json::from_str(&columns_json).map_err(|e| conversion_error(2, e.into()))?,
            source_url: row.get(3)?,
            refresh_interval: interval.map(|s| s as u64),
            mapping: serde_json::from_str::<Mapping>(&mapping_json)
                .map_err(|e| conversion_error(5, e.into()))?,
        },
        status: row.get(6)?,
        last_refresh_success: row.get(7)?,
        last_refresh_error: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, rusqlite::Error> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn conversion_error(
    idx: usize,
    err: Box<dyn std::error::Error + Send + Sync + 'static>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err)
}
