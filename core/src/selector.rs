//! Record selector: builds and runs the candidate queries.
//!
//! Selection mode is resolved (and its exclusivity enforced) before any query
//! is sent. Row order from the database is not relied on anywhere downstream.

use crate::{
    error::{CloseoutError, CloseoutResult},
    gateway::{DatabaseGateway, NamedParams},
    record::{Record, SqlValue},
    types::{format_date, parse_date},
};
use chrono::NaiveDate;

/// Placeholder for the IN-clause code list inside configured queries.
pub const MINOR_CODES_PLACEHOLDER: &str = "{{minor_codes}}";

/// Bind parameter carrying the effective date in date-range mode (ISO text).
pub const EFFDATE_PARAM: &str = ":effdate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionCriteria {
    DateRange { effective_date: NaiveDate },
    FullCleanup,
}

impl SelectionCriteria {
    /// Resolve the two mutually exclusive options into one criteria value.
    pub fn resolve(effective_date: Option<&str>, full_cleanup: bool) -> CloseoutResult<Self> {
        let effective_date = effective_date.map(str::trim).filter(|d| !d.is_empty());
        match (effective_date, full_cleanup) {
            (Some(raw), false) => parse_date(raw)
                .map(|effective_date| SelectionCriteria::DateRange { effective_date })
                .ok_or_else(|| {
                    CloseoutError::config(format!(
                        "effective_date '{raw}' is not a valid MM/DD/YYYY date"
                    ))
                }),
            (None, true) => Ok(SelectionCriteria::FullCleanup),
            (Some(raw), true) => Err(CloseoutError::config(format!(
                "effective_date ({raw}) and full_cleanup are mutually exclusive; supply exactly one"
            ))),
            (None, false) => Err(CloseoutError::config(
                "one of effective_date or full_cleanup is required",
            )),
        }
    }

    pub fn is_full_cleanup(&self) -> bool {
        matches!(self, SelectionCriteria::FullCleanup)
    }

    /// Line written under the audit title.
    pub fn audit_label(&self) -> String {
        match self {
            SelectionCriteria::DateRange { effective_date } => {
                format!("EFFDATE: {}", format_date(*effective_date))
            }
            SelectionCriteria::FullCleanup => "SELECTION: FULL CLEANUP".to_string(),
        }
    }
}

/// Format a comma-separated code list for literal use in a SQL IN clause.
///
/// Each code is trimmed, upper-cased and single-quoted (embedded quotes are
/// doubled). Empty segments are dropped.
///
/// An empty or blank input yields an empty string. That is a pass-through, not
/// an error: the query then receives no codes at all, which usually selects far
/// more (or fewer) rows than intended. Callers log it as a configuration hazard.
pub fn format_codes(codes: &str) -> String {
    codes
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| format!("'{}'", code.to_uppercase().replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(",")
}

pub struct RecordSelector<'a> {
    criteria: SelectionCriteria,
    queries: &'a [String],
    minor_codes: &'a str,
}

impl<'a> RecordSelector<'a> {
    pub fn new(criteria: SelectionCriteria, queries: &'a [String], minor_codes: &'a str) -> Self {
        Self {
            criteria,
            queries,
            minor_codes,
        }
    }

    /// Run every configured query and map the combined rows to records.
    pub fn select(&self, gateway: &mut dyn DatabaseGateway) -> CloseoutResult<Vec<Record>> {
        let codes = format_codes(self.minor_codes);
        if codes.is_empty() {
            log::warn!("selector: minor code list is empty; IN-clause receives no codes");
        }

        let params: NamedParams = match self.criteria {
            SelectionCriteria::DateRange { effective_date } => vec![(
                EFFDATE_PARAM.to_string(),
                SqlValue::Text(effective_date.format("%Y-%m-%d").to_string()),
            )],
            SelectionCriteria::FullCleanup => Vec::new(),
        };

        let mut records = Vec::new();
        for query in self.queries {
            // IN-clause lists cannot be bound; the codes are substituted literally.
            let sql = query.replace(MINOR_CODES_PLACEHOLDER, &codes);
            let rows = if sql.contains(EFFDATE_PARAM) {
                gateway.select(&sql, &params)?
            } else {
                gateway.select(&sql, &Vec::new())?
            };
            log::debug!("selector: query returned {} rows", rows.len());
            for row in &rows {
                let record = Record::from_row(row)?;
                log::debug!("selector: closed account {}", record.account_id);
                records.push(record);
            }
        }

        log::info!("selector: found {} records to process", records.len());
        Ok(records)
    }
}
