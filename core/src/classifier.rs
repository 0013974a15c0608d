//! Record classifier: business-rule dispositions.
//!
//! RULE ORDER (first match wins):
//!   0. Unreadable row data
//!   1. Duplicate suppression
//!   2. Email validity
//!   3. Balance
//!   4. Active note
//!
//! A record no rule excludes stays `Pending` and its dedup key is marked seen
//! before the caller runs the terminal action, whatever that action's outcome.

use crate::{
    config::PipelineVariant,
    record::{EntityType, Record},
    types::{AccountId, EntityId},
};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Passed every rule; waiting on the terminal action.
    Pending,
    Sent,
    Updated,
    Failed { message: String },
    SkippedDuplicate,
    SkippedInvalidEmail,
    SkippedHasBalance,
    SkippedActiveNote { class_code: String },
    /// Row fields that could not be read; `reason` lists them.
    SkippedUnreadable { reason: String },
}

impl Disposition {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Disposition::Pending)
    }

    /// Exceptions go to the EXCEPTIONS section of the audit file.
    pub fn is_exception(&self) -> bool {
        match self {
            Disposition::Pending
            | Disposition::Sent
            | Disposition::Updated
            | Disposition::SkippedDuplicate => false,
            Disposition::Failed { .. }
            | Disposition::SkippedInvalidEmail
            | Disposition::SkippedHasBalance
            | Disposition::SkippedActiveNote { .. }
            | Disposition::SkippedUnreadable { .. } => true,
        }
    }

    /// RESULT column text.
    pub fn result_text(&self, variant: PipelineVariant) -> String {
        match self {
            Disposition::Pending => String::new(),
            Disposition::Sent => "Email Sent".into(),
            Disposition::Updated => "Success".into(),
            Disposition::Failed { message } => message.clone(),
            Disposition::SkippedDuplicate => variant.duplicate_text().into(),
            Disposition::SkippedInvalidEmail => "Email Address Invalid".into(),
            Disposition::SkippedHasBalance => "Account Has Balance".into(),
            Disposition::SkippedActiveNote { class_code } => {
                format!("Existing Active {class_code} Note")
            }
            Disposition::SkippedUnreadable { reason } => format!("Unreadable Record: {reason}"),
        }
    }
}

/// Which record field identifies "the same target" within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKey {
    Email,
    Entity,
    Account,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SeenKey {
    Email(String),
    Entity(EntityType, EntityId),
    Account(AccountId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierRules {
    pub dedup_key: DedupKey,
    pub validate_email: bool,
    pub check_balance: bool,
    /// Note class whose unexpired presence blocks the record (e.g. `8FDI`).
    pub active_note_class: Option<String>,
}

pub struct Classifier {
    rules: ClassifierRules,
    today: NaiveDate,
    seen: HashSet<SeenKey>,
}

impl Classifier {
    pub fn new(rules: ClassifierRules, today: NaiveDate) -> Self {
        Self {
            rules,
            today,
            seen: HashSet::new(),
        }
    }

    /// Classify one record. `Pending` means eligible for the terminal action.
    pub fn classify(&mut self, record: &Record) -> Disposition {
        if !record.unreadable.is_empty() {
            return Disposition::SkippedUnreadable {
                reason: record.unreadable.join("; "),
            };
        }

        let key = self.key_for(record);
        if key.as_ref().is_some_and(|k| self.seen.contains(k)) {
            return Disposition::SkippedDuplicate;
        }

        if self.rules.validate_email && !is_valid_email(record.email.as_deref().unwrap_or("")) {
            return Disposition::SkippedInvalidEmail;
        }

        if self.rules.check_balance && has_balance(record) {
            return Disposition::SkippedHasBalance;
        }

        if let Some(class_code) = &self.rules.active_note_class {
            if has_active_note(record, class_code, self.today) {
                return Disposition::SkippedActiveNote {
                    class_code: class_code.clone(),
                };
            }
        }

        if let Some(key) = key {
            self.seen.insert(key);
        }
        Disposition::Pending
    }

    fn key_for(&self, record: &Record) -> Option<SeenKey> {
        match self.rules.dedup_key {
            DedupKey::Email => record
                .email
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(|e| SeenKey::Email(e.to_lowercase())),
            DedupKey::Entity => Some(SeenKey::Entity(record.entity_type, record.entity_id)),
            DedupKey::Account => Some(SeenKey::Account(record.account_id)),
        }
    }
}

/// Absent balance counts as zero.
pub fn has_balance(record: &Record) -> bool {
    record.balance.unwrap_or(0.0) != 0.0
}

/// A note of `class_code` is active when its inactive date is today or later.
/// A missing inactive date means the note is not active.
pub fn has_active_note(record: &Record, class_code: &str, today: NaiveDate) -> bool {
    match &record.note {
        Some(note) if note.class_code.eq_ignore_ascii_case(class_code) => {
            note.inactive_date.is_some_and(|inactive| inactive >= today)
        }
        _ => false,
    }
}

/// Syntactic address check: dot-atom local part, dotted domain with an
/// alphabetic top-level label. Letters and digits from any script are
/// accepted on both sides of the `@`. No deliverability lookup.
pub fn is_valid_email(address: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(concat!(
            r"^[\p{L}\p{N}!#$%&'*+/=?^_`{|}~-]+(?:\.[\p{L}\p{N}!#$%&'*+/=?^_`{|}~-]+)*",
            r"@(?:[\p{L}\p{N}](?:[\p{L}\p{N}-]{0,61}[\p{L}\p{N}])?\.)+\p{L}{2,63}$",
        ))
        .unwrap()
    });

    let address = address.trim();
    if address.is_empty() || address.chars().count() > 254 {
        return false;
    }
    match address.split_once('@') {
        Some((local, _)) if local.chars().count() <= 64 => re.is_match(address),
        _ => false,
    }
}
