//! Batch updater: one bulk UPDATE for every eligible record.
//!
//! Submission order is the reconciliation key: the driver reports failing rows
//! by zero-based offset, and offset `i` is the `i`-th record handed to `apply`.
//! The input slice is never reordered between submission and reconciliation.

use crate::{
    error::{CloseoutError, CloseoutResult},
    gateway::{CommitMode, DatabaseGateway, NamedParams},
    record::{EntityType, Record, SqlValue},
    types::{AccountId, EntityId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const KEY_PARAM: &str = ":key";
pub const VALUE_PARAM: &str = ":value";

/// Which record identifier is bound to `:key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKey {
    /// `key_column` holds account numbers.
    Account,
    /// `key_column` holds person/organization numbers.
    Entity,
}

impl UpdateKey {
    pub fn value_for(&self, record: &Record) -> i64 {
        match self {
            UpdateKey::Account => record.account_id,
            UpdateKey::Entity => record.entity_id,
        }
    }
}

/// Table, status field and key column the cleanup flips.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateTarget {
    pub table: String,
    pub field: String,
    pub key_column: String,
    pub key: UpdateKey,
    pub value: String,
}

impl UpdateTarget {
    pub fn sql(&self) -> String {
        format!(
            "UPDATE {} SET {} = {VALUE_PARAM} WHERE {} = {KEY_PARAM}",
            self.table, self.field, self.key_column
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Success,
    Fail,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Success => "Success",
            RowStatus::Fail => "Fail",
        }
    }
}

/// Per-record outcome, carrying enough identity to build the audit row.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRow {
    /// Position of the record in the submitted batch.
    pub position: usize,
    pub entity_id: EntityId,
    pub account_id: AccountId,
    pub entity_type: EntityType,
    pub close_date: Option<NaiveDate>,
    pub status: RowStatus,
    /// Driver message for failed rows.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    pub successes: Vec<UpdateRow>,
    pub failures: Vec<UpdateRow>,
}

pub struct BatchUpdater<'a> {
    target: &'a UpdateTarget,
    mode: CommitMode,
}

impl<'a> BatchUpdater<'a> {
    pub fn new(target: &'a UpdateTarget, mode: CommitMode) -> Self {
        Self { target, mode }
    }

    pub fn apply(
        &self,
        gateway: &mut dyn DatabaseGateway,
        records: &[&Record],
    ) -> CloseoutResult<UpdateReport> {
        if records.is_empty() {
            log::info!("updater: nothing to update");
            return Ok(UpdateReport::default());
        }

        let rows: Vec<NamedParams> = records
            .iter()
            .map(|record| {
                vec![
                    (KEY_PARAM.to_string(), SqlValue::Integer(self.target.key.value_for(record))),
                    (VALUE_PARAM.to_string(), SqlValue::Text(self.target.value.clone())),
                ]
            })
            .collect();

        let outcome = gateway.batch_write(&self.target.sql(), &rows, self.mode)?;

        let mut failed: BTreeMap<usize, String> = BTreeMap::new();
        for failure in &outcome.failures {
            if failure.offset >= records.len() {
                return Err(CloseoutError::UnresolvedOffset {
                    offset: failure.offset,
                    submitted: records.len(),
                });
            }
            failed
                .entry(failure.offset)
                .or_insert_with(|| failure.message.clone());
        }

        let mut report = UpdateReport::default();
        for (position, record) in records.iter().enumerate() {
            let error = failed.remove(&position);
            let status = if error.is_some() {
                RowStatus::Fail
            } else {
                RowStatus::Success
            };
            let row = UpdateRow {
                position,
                entity_id: record.entity_id,
                account_id: record.account_id,
                entity_type: record.entity_type,
                close_date: record.close_date,
                status,
                error,
            };
            match status {
                RowStatus::Success => report.successes.push(row),
                RowStatus::Fail => {
                    log::warn!(
                        "updater: account {} failed: {}",
                        row.account_id,
                        row.error.as_deref().unwrap_or_default()
                    );
                    report.failures.push(row);
                }
            }
        }

        log::info!(
            "updater: submitted {}, succeeded {}, failed {}, committed {} ({:?})",
            outcome.submitted,
            report.successes.len(),
            report.failures.len(),
            outcome.committed,
            self.mode
        );
        Ok(report)
    }
}
