use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, InterruptHandle};
use tokio::task;

use schemaflow_utils::error::Error;
use schemaflow_utils::{Row, SchemaflowResult, SqlValue, DATE_FORMAT, TIMESTAMP_FORMAT};

use super::Destination;
use crate::schema::types::{is_identifier, is_sql_type, ColumnDef, ColumnType, TableKind};

/// User tables in a SQLite database.
///
/// Statements run on the blocking pool so a slow disk never stalls the
/// runtime and callers can bound them with a timeout. Dropping an
/// `insert_rows` future before it resolves rolls the batch back: a batch
/// still waiting for the connection never starts, and one being written is
/// interrupted. Only a batch already committing goes through.
#[derive(Clone)]
pub struct SqliteDestination {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadPhase {
    Queued,
    Writing,
    Committing,
    Cancelled,
}

/// Shared between an insert future and the blocking work it started.
#[derive(Clone)]
struct LoadTicket {
    phase: Arc<Mutex<LoadPhase>>,
}

impl LoadTicket {
    fn new() -> Self {
        Self { phase: Arc::new(Mutex::new(LoadPhase::Queued)) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoadPhase> {
        self.phase.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Move to `next` unless the caller has gone away.
    fn advance(&self, next: LoadPhase) -> SchemaflowResult<()> {
        let mut phase = self.lock();
        if *phase == LoadPhase::Cancelled {
            return Err(Error::Cancelled("load"));
        }
        *phase = next;
        Ok(())
    }

    fn check(&self) -> SchemaflowResult<()> {
        if *self.lock() == LoadPhase::Cancelled {
            return Err(Error::Cancelled("load"));
        }
        Ok(())
    }
}

/// Cancels its ticket when the insert future is dropped unfinished.
struct CancelOnDrop {
    table: String,
    ticket: LoadTicket,
    interrupt: Arc<InterruptHandle>,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let mut phase = self.ticket.lock();
        match *phase {
            LoadPhase::Queued => *phase = LoadPhase::Cancelled,
            // The phase lock keeps the writer on this batch while it is interrupted.
            LoadPhase::Writing => {
                *phase = LoadPhase::Cancelled;
                self.interrupt.interrupt();
                tracing::warn!(table = %self.table, "abandoned load interrupted; batch rolled back");
            }
            LoadPhase::Committing | LoadPhase::Cancelled => {}
        }
    }
}

impl SqliteDestination {
    pub fn open(path: impl AsRef<Path>) -> SchemaflowResult<Self> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    pub fn in_memory() -> SchemaflowResult<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Self { conn: Arc::new(Mutex::new(conn)), interrupt }
    }

    async fn blocking<F, T>(&self, f: F) -> SchemaflowResult<T>
    where
        F: FnOnce(&mut Connection) -> SchemaflowResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::Task("sqlite connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))?
    }
}

fn checked_identifier(name: &str) -> SchemaflowResult<String> {
    if is_identifier(name) {
        Ok(format!("\"{name}\""))
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}

fn table_columns(conn: &Connection, table: &str) -> SchemaflowResult<Vec<ColumnDef>> {
    let quoted = checked_identifier(table)?;
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({quoted})"))?;
    let columns = stmt
        .query_map([], |row| Ok(ColumnDef::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Err(Error::MissingTable(table.to_string()));
    }
    Ok(columns)
}

fn to_sqlite(value: &SqlValue) -> SqliteValue {
    match value {
        SqlValue::Null => SqliteValue::Null,
        SqlValue::Integer(i) => SqliteValue::Integer(*i),
        SqlValue::Float(f) => SqliteValue::Real(*f),
        SqlValue::Boolean(b) => SqliteValue::Integer(i64::from(*b)),
        other => other.to_text().map(SqliteValue::Text).unwrap_or(SqliteValue::Null),
    }
}

/// Read a stored value back as the column's type class. Storage affinity may
/// have changed the representation (e.g. JSON `5` stored as an integer).
fn from_sqlite(class: ColumnType, value: ValueRef<'_>) -> SqlValue {
    let text = |bytes: &[u8]| String::from_utf8_lossy(bytes).into_owned();
    match (class, value) {
        (_, ValueRef::Null) => SqlValue::Null,
        (ColumnType::Integer, ValueRef::Integer(i)) => SqlValue::Integer(i),
        (ColumnType::Integer, ValueRef::Real(f)) => SqlValue::Integer(f as i64),
        (ColumnType::Float, ValueRef::Real(f)) => SqlValue::Float(f),
        (ColumnType::Float, ValueRef::Integer(i)) => SqlValue::Float(i as f64),
        (ColumnType::Boolean, ValueRef::Integer(i)) => SqlValue::Boolean(i != 0),
        (ColumnType::Date, ValueRef::Text(t)) => {
            let s = text(t);
            NaiveDate::parse_from_str(&s, DATE_FORMAT).map(SqlValue::Date).unwrap_or(SqlValue::Text(s))
        }
        (ColumnType::Timestamp, ValueRef::Text(t)) => {
            let s = text(t);
            NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT)
                .map(SqlValue::Timestamp)
                .unwrap_or(SqlValue::Text(s))
        }
        (ColumnType::Json, ValueRef::Text(t)) => {
            let s = text(t);
            serde_json::from_str(&s).map(SqlValue::Json).unwrap_or(SqlValue::Text(s))
        }
        (ColumnType::Json, ValueRef::Integer(i)) => SqlValue::Json(i.into()),
        (ColumnType::Json, ValueRef::Real(f)) => {
            serde_json::Number::from_f64(f).map(|n| SqlValue::Json(n.into())).unwrap_or(SqlValue::Null)
        }
        (_, ValueRef::Integer(i)) => SqlValue::Text(i.to_string()),
        (_, ValueRef::Real(f)) => SqlValue::Text(f.to_string()),
        (_, ValueRef::Text(t)) | (_, ValueRef::Blob(t)) => SqlValue::Text(text(t)),
    }
}

#[async_trait]
impl Destination for SqliteDestination {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_table(&self, name: &str, kind: TableKind, columns: &[ColumnDef]) -> SchemaflowResult<()> {
        let quoted = checked_identifier(name)?;
        let mut defs = Vec::with_capacity(columns.len());
        for column in columns {
            if !is_sql_type(&column.sql_type) {
                return Err(Error::InvalidIdentifier(column.sql_type.clone()));
            }
            defs.push(format!("{} {}", checked_identifier(&column.name)?, column.sql_type));
        }
        let ddl = format!("CREATE TABLE {quoted} ({})", defs.join(", "));
        tracing::debug!(table = %name, kind = %kind, "creating table");
        self.blocking(move |conn| {
            conn.execute_batch(&ddl)?;
            Ok(())
        })
        .await
    }

    async fn list_tables(&self) -> SchemaflowResult<Vec<String>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let names = stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })
        .await
    }

    async fn get_columns(&self, name: &str) -> SchemaflowResult<Vec<ColumnDef>> {
        let name = name.to_string();
        self.blocking(move |conn| table_columns(conn, &name)).await
    }

    async fn insert_rows(&self, name: &str, rows: Vec<Row>) -> SchemaflowResult<u64> {
        let quoted = checked_identifier(name)?;
        let ticket = LoadTicket::new();
        let _cancel = CancelOnDrop {
            table: name.to_string(),
            ticket: ticket.clone(),
            interrupt: self.interrupt.clone(),
        };
        self.blocking(move |conn| {
            ticket.advance(LoadPhase::Writing)?;
            let tx = conn.transaction()?;
            let mut inserted = 0u64;
            for row in &rows {
                ticket.check()?;
                let columns = row
                    .columns()
                    .map(checked_identifier)
                    .collect::<SchemaflowResult<Vec<_>>>()?;
                if columns.is_empty() {
                    inserted += tx.execute(&format!("INSERT INTO {quoted} DEFAULT VALUES"), [])? as u64;
                    continue;
                }
                let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
                let sql = format!(
                    "INSERT INTO {quoted} ({}) VALUES ({})",
                    columns.join(", "),
                    placeholders.join(", ")
                );
                let values = row.iter().map(|(_, v)| to_sqlite(v));
                inserted += tx.prepare_cached(&sql)?.execute(params_from_iter(values))? as u64;
            }
            ticket.advance(LoadPhase::Committing)?;
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    async fn delete_table(&self, name: &str) -> SchemaflowResult<()> {
        let quoted = checked_identifier(name)?;
        self.blocking(move |conn| {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {quoted}"))?;
            Ok(())
        })
        .await
    }

    async fn query(&self, name: &str, limit: Option<usize>) -> SchemaflowResult<Vec<Row>> {
        let name = name.to_string();
        self.blocking(move |conn| {
            let columns = table_columns(conn, &name)?;
            let quoted = checked_identifier(&name)?;
            let mut stmt = conn.prepare(&format!("SELECT * FROM {quoted} ORDER BY rowid LIMIT ?1"))?;
            let limit = limit.map(|l| l as i64).unwrap_or(-1);
            let mut rows = stmt.query(params![limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut typed = Row::new();
                for (idx, column) in columns.iter().enumerate() {
                    typed.push(column.name.clone(), from_sqlite(column.class(), row.get_ref(idx)?));
                }
                out.push(typed);
            }
            Ok(out)
        })
        .await
    }
}
