//! Append-only refresh history.
//!
//! Every refresh attempt, manual or scheduled, ends in exactly one row of
//! `refresh_logs`. Rows are never updated or deleted here; retention is left
//! to whoever operates the database.

use std::fmt;
use std::str::FromStr;

use rusqlite::params;
use rusqlite::types::Type;
use serde::Serialize;

use crate::events::trigger::TriggerKind;
use crate::store::db::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failure,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AttemptStatus::Success),
            "failure" => Ok(AttemptStatus::Failure),
            other => Err(format!("unknown attempt status '{other}'")),
        }
    }
}

/// An attempt that has finished but is not yet written.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub run_id: String,
    pub table: String,
    pub trigger: TriggerKind,
    pub status: AttemptStatus,
    pub message: String,
    pub rows_affected: u64,
    pub started_at: String,
    pub finished_at: String,
}

/// A stored refresh attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshAttempt {
    pub id: i64,
    pub run_id: String,
    pub table: String,
    pub trigger: TriggerKind,
    pub status: AttemptStatus,
    pub message: String,
    pub rows_affected: u64,
    pub started_at: String,
    pub finished_at: String,
}

/// Attempt counts grouped by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusBreakdown {
    pub success: u64,
    pub failure: u64,
}

impl StatusBreakdown {
    pub fn total(&self) -> u64 {
        self.success + self.failure
    }
}

impl Store {
    /// Append a finished attempt and return it with its assigned id.
    pub fn append_attempt(&self, attempt: &NewAttempt) -> Result<RefreshAttempt, rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO refresh_logs
                (run_id, table_name, trigger_type, status, message, rows_affected, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                attempt.run_id,
                attempt.table,
                attempt.trigger.as_str(),
                attempt.status.as_str(),
                attempt.message,
                attempt.rows_affected as i64,
                attempt.started_at,
                attempt.finished_at,
            ],
        )?;
        Ok(RefreshAttempt {
            id: self.conn.last_insert_rowid(),
            run_id: attempt.run_id.clone(),
            table: attempt.table.clone(),
            trigger: attempt.trigger,
            status: attempt.status,
            message: attempt.message.clone(),
            rows_affected: attempt.rows_affected,
            started_at: attempt.started_at.clone(),
            finished_at: attempt.finished_at.clone(),
        })
    }

    /// Attempts for one table, most recent first.
    pub fn attempts_for(&self, table: &str, limit: usize) -> Result<Vec<RefreshAttempt>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, table_name, trigger_type, status, message, rows_affected, started_at, finished_at
             FROM refresh_logs WHERE table_name = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![table, limit as i64], |row| {
            let trigger: String = row.get(3)?;
            let status: String = row.get(4)?;
            let rows_affected: i64 = row.get(6)?;
            Ok(RefreshAttempt {
                id: row.get(0)?,
                run_id: row.get(1)?,
                table: row.get(2)?,
                trigger: trigger.parse().map_err(|e: String| bad_text(3, e))?,
                status: status.parse().map_err(|e: String| bad_text(4, e))?,
                message: row.get(5)?,
                rows_affected: rows_affected.max(0) as u64,
                started_at: row.get(7)?,
                finished_at: row.get(8)?,
            })
        })?;
        rows.collect()
    }

    /// Count attempts by status, for one table or (with `None`) for all of them.
    pub fn status_breakdown(&self, table: Option<&str>) -> Result<StatusBreakdown, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM refresh_logs
             WHERE ?1 IS NULL OR table_name = ?1
             GROUP BY status",
        )?;
        let mut breakdown = StatusBreakdown::default();
        let mut rows = stmt.query(params![table])?;
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            match status.parse().map_err(|e: String| bad_text(0, e))? {
                AttemptStatus::Success => breakdown.success = count as u64,
                AttemptStatus::Failure => breakdown.failure = count as u64,
            }
        }
        Ok(breakdown)
    }
}

fn bad_text(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(table: &str, status: AttemptStatus, rows: u64, at: &str) -> NewAttempt {
        NewAttempt {
            run_id: uuid::Uuid::new_v4().to_string(),
            table: table.to_string(),
            trigger: TriggerKind::Scheduled,
            status,
            message: format!("Inserted {rows} rows"),
            rows_affected: rows,
            started_at: at.to_string(),
            finished_at: at.to_string(),
        }
    }

    #[test]
    fn attempts_listed_most_recent_first() {
        let store = Store::in_memory().unwrap();
        for i in 0..5 {
            store
                .append_attempt(&attempt("weather_data", AttemptStatus::Success, i, &format!("2026-02-03T10:00:0{i}Z")))
                .unwrap();
        }
        store.append_attempt(&attempt("other", AttemptStatus::Success, 9, "2026-02-03T10:00:09Z")).unwrap();

        let attempts = store.attempts_for("weather_data", 3).unwrap();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0].rows_affected, 4);
        assert!(attempts[0].id > attempts[1].id);
        assert!(attempts.iter().all(|a| a.table == "weather_data"));
    }

    #[test]
    fn append_assigns_increasing_ids() {
        let store = Store::in_memory().unwrap();
        let a = store.append_attempt(&attempt("t", AttemptStatus::Failure, 0, "2026-02-03T10:00:00Z")).unwrap();
        let b = store.append_attempt(&attempt("t", AttemptStatus::Success, 1, "2026-02-03T10:00:00Z")).unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.trigger, TriggerKind::Scheduled);
    }

    #[test]
    fn breakdown_counts_per_table_and_overall() {
        let store = Store::in_memory().unwrap();
        store.append_attempt(&attempt("a", AttemptStatus::Success, 1, "2026-02-03T10:00:00Z")).unwrap();
        store.append_attempt(&attempt("a", AttemptStatus::Failure, 0, "2026-02-03T10:00:01Z")).unwrap();
        store.append_attempt(&attempt("a", AttemptStatus::Success, 2, "2026-02-03T10:00:02Z")).unwrap();
        store.append_attempt(&attempt("b", AttemptStatus::Failure, 0, "2026-02-03T10:00:03Z")).unwrap();

        let a = store.status_breakdown(Some("a")).unwrap();
        assert_eq!(a, StatusBreakdown { success: 2, failure: 1 });

        let all = store.status_breakdown(None).unwrap();
        assert_eq!(all.total(), 4);
        assert_eq!(all.failure, 2);

        assert_eq!(store.status_breakdown(Some("none")).unwrap().total(), 0);
    }
}
