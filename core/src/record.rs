//! Typed closed-account records.
//!
//! RULE: Gateway rows are loosely typed. They are mapped to `Record` right after
//! the fetch, and nothing downstream of the selector touches column names.

use crate::{
    error::{CloseoutError, CloseoutResult},
    types::{parse_date, AccountId, EntityId},
};
use chrono::NaiveDate;
use rusqlite::types::{ToSql, ToSqlOutput, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One database cell as it crosses the gateway boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Integer(i) => Some(i.to_string()),
            SqlValue::Real(f) => Some(f.to_string()),
            SqlValue::Text(s) if s.trim().is_empty() => None,
            SqlValue::Text(s) => Some(s.clone()),
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Real(f) if f.fract() == 0.0 => Some(*f as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::Real(f) => Some(*f),
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Null => None,
        }
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Integer(i) => SqlValue::Integer(i),
            Value::Real(f) => SqlValue::Real(f),
            Value::Text(s) => SqlValue::Text(s),
            Value::Blob(b) => SqlValue::Text(String::from_utf8_lossy(&b).into_owned()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::from(*i),
            SqlValue::Real(f) => ToSqlOutput::from(*f),
            SqlValue::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

/// A fetched row, keyed by upper-cased column name.
pub type Row = BTreeMap<String, SqlValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Pers,
    Org,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Pers => "pers",
            EntityType::Org => "org",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A note attached to the account (e.g. class `8FDI`).
#[derive(Debug, Clone, PartialEq)]
pub struct AccountNote {
    pub class_code: String,
    pub inactive_date: Option<NaiveDate>,
}

/// One closed-account candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub account_id: AccountId,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    /// Missing only when the row's CLOSEDATE could not be read.
    pub close_date: Option<NaiveDate>,
    pub minor: Option<String>,
    pub email: Option<String>,
    pub member_name: Option<String>,
    pub email_date: Option<NaiveDate>,
    pub balance: Option<f64>,
    pub note: Option<AccountNote>,
    /// Fields present in the row that could not be read. A non-empty list
    /// keeps the record away from the terminal action.
    pub unreadable: Vec<String>,
}

impl Record {
    /// Map a gateway row onto a typed record.
    pub fn from_row(row: &Row) -> CloseoutResult<Self> {
        let account_text = text(row, "ACCTNBR").unwrap_or_else(|| "<missing>".into());
        let shape_err = |reason: String| CloseoutError::RecordShape {
            account: account_text.clone(),
            reason,
        };

        let account_id = row
            .get("ACCTNBR")
            .and_then(SqlValue::as_i64)
            .ok_or_else(|| shape_err("ACCTNBR is missing or not numeric".into()))?;

        let pers = row.get("PERSNBR").and_then(SqlValue::as_i64);
        let org = row.get("ORGNBR").and_then(SqlValue::as_i64);
        let (entity_type, entity_id) = match (pers, org) {
            (Some(p), None) => (EntityType::Pers, p),
            (None, Some(o)) => (EntityType::Org, o),
            (Some(_), Some(_)) => {
                return Err(shape_err("both PERSNBR and ORGNBR are present".into()))
            }
            (None, None) => return Err(shape_err("neither PERSNBR nor ORGNBR is present".into())),
        };

        let mut unreadable = Vec::new();
        let mut read_date = |column: &str| match date(row, column) {
            Ok(value) => value,
            Err(problem) => {
                log::warn!("record: account {account_id}: {problem}");
                unreadable.push(problem);
                None
            }
        };

        let close_date = read_date("CLOSEDATE");
        let email_date = read_date("EMAILDATE");
        let note_inactive = match read_date("FDI_INACTIVE_DATE") {
            Some(d) => Some(d),
            None => read_date("NOTEINACTIVEDATE"),
        };
        if close_date.is_none() && text(row, "CLOSEDATE").is_none() {
            unreadable.push("CLOSEDATE is missing".to_string());
        }

        let note_class = text(row, "FDI_NOTECLASSCD").or_else(|| text(row, "NOTECLASSCD"));
        let note = note_class.map(|class_code| AccountNote {
            class_code: class_code.trim().to_string(),
            inactive_date: note_inactive,
        });

        Ok(Record {
            account_id,
            entity_type,
            entity_id,
            close_date,
            minor: text(row, "MINOR"),
            email: text(row, "EMAILADDR").map(|e| e.trim().to_string()),
            member_name: text(row, "MEMBERNAME"),
            email_date,
            balance: row.get("BALANCE").and_then(SqlValue::as_f64),
            note,
            unreadable,
        })
    }
}

fn text(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(SqlValue::as_text)
}

fn date(row: &Row, column: &str) -> Result<Option<NaiveDate>, String> {
    match text(row, column) {
        None => Ok(None),
        Some(raw) => parse_date(&raw)
            .map(Some)
            .ok_or_else(|| format!("{column} has unrecognised date '{raw}'")),
    }
}
