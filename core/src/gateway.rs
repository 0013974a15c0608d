//! Database gateway.
//!
//! RULE: Only the gateway talks to the database.
//! The selector and the batch updater hold the gateway exclusively for the
//! run; neither executes SQL through any other handle.

use crate::{
    error::{CloseoutError, CloseoutResult},
    record::{Row, SqlValue},
};
use rusqlite::{types::ToSql, Connection, OpenFlags};
use std::collections::BTreeSet;

/// Named bind parameters for one statement execution, e.g. `(":effdate", ..)`.
pub type NamedParams = Vec<(String, SqlValue)>;

/// How a batch write ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    Commit,
    /// Execute every row to surface failures, then roll back.
    Rollback,
}

/// One failing row, addressed by its zero-based position in the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub offset: usize,
    pub message: String,
}

/// Result of one bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub submitted: usize,
    pub failures: Vec<BatchFailure>,
    /// Rows actually persisted; always 0 after a rollback.
    pub committed: usize,
}

impl BatchOutcome {
    /// Rows that went through. A row reported failing more than once still
    /// counts once.
    pub fn successes(&self) -> usize {
        let failed: BTreeSet<usize> = self.failures.iter().map(|f| f.offset).collect();
        self.submitted.saturating_sub(failed.len())
    }
}

/// The two database capabilities the pipeline consumes.
pub trait DatabaseGateway {
    /// Run a parametrized SELECT and return every row.
    fn select(&mut self, sql: &str, params: &NamedParams) -> CloseoutResult<Vec<Row>>;

    /// Execute `sql` once per parameter set inside one transaction.
    /// Per-row failures are collected, not raised.
    fn batch_write(
        &mut self,
        sql: &str,
        rows: &[NamedParams],
        mode: CommitMode,
    ) -> CloseoutResult<BatchOutcome>;
}

pub struct SqliteGateway {
    conn: Connection,
}

impl SqliteGateway {
    pub fn open(path: &str) -> CloseoutResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> CloseoutResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Direct access for fixtures and post-run inspection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn bind(params: &NamedParams) -> Vec<(&str, &dyn ToSql)> {
    params
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect()
}

fn query_error(e: rusqlite::Error) -> CloseoutError {
    CloseoutError::Query(e.to_string())
}

impl DatabaseGateway for SqliteGateway {
    fn select(&mut self, sql: &str, params: &NamedParams) -> CloseoutResult<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql).map_err(query_error)?;
        let columns: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|c| c.to_uppercase())
            .collect();

        let bound = bind(params);
        let mut rows = stmt.query(bound.as_slice()).map_err(query_error)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(query_error)? {
            let mut mapped = Row::new();
            for (i, column) in columns.iter().enumerate() {
                let value: rusqlite::types::Value = row.get(i).map_err(query_error)?;
                mapped.insert(column.clone(), SqlValue::from(value));
            }
            out.push(mapped);
        }
        Ok(out)
    }

    fn batch_write(
        &mut self,
        sql: &str,
        rows: &[NamedParams],
        mode: CommitMode,
    ) -> CloseoutResult<BatchOutcome> {
        let tx = self.conn.transaction()?;
        let mut failures = Vec::new();
        let mut applied = 0usize;
        {
            let mut stmt = tx.prepare(sql).map_err(query_error)?;
            for (offset, params) in rows.iter().enumerate() {
                let bound = bind(params);
                match stmt.execute(bound.as_slice()) {
                    Ok(changed) => applied += changed,
                    Err(e) => failures.push(BatchFailure {
                        offset,
                        message: e.to_string(),
                    }),
                }
            }
        }

        let committed = match mode {
            CommitMode::Commit => {
                tx.commit()?;
                applied
            }
            CommitMode::Rollback => {
                tx.rollback()?;
                0
            }
        };

        Ok(BatchOutcome {
            submitted: rows.len(),
            failures,
            committed,
        })
    }
}
