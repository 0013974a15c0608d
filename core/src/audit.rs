//! Audit reporter: the partitioned CSV artifact every run leaves behind.
//!
//! The file is never appended to or overwritten: `ensure_absent` runs before
//! any mutation, and the final write opens with create-new semantics. Every
//! line, blank ones included, ends in CRLF.

use crate::{
    classifier::Disposition,
    config::PipelineVariant,
    error::{CloseoutError, CloseoutResult},
    record::{EntityType, Record},
    types::{format_date, AccountId, EntityId},
};
use chrono::NaiveDate;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const NONE_MARKER: &str = "NONE";
pub const END_MARKER: &str = "END";
pub const EXCEPTIONS_HEADING: &str = "EXCEPTIONS";

/// A column the audit file can carry, in the order the config lists them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditField {
    AcctNbr,
    PersNbr,
    OrgNbr,
    EntityType,
    EntityNbr,
    Minor,
    CloseDate,
    EmailDate,
    MemberName,
    EmailAddr,
    Balance,
    NoteClassCd,
    NoteInactiveDate,
    Result,
    ExcpYn,
}

impl AuditField {
    pub fn parse(name: &str) -> Option<Self> {
        let field = match name.trim().to_uppercase().as_str() {
            "ACCTNBR" => AuditField::AcctNbr,
            "PERSNBR" => AuditField::PersNbr,
            "ORGNBR" => AuditField::OrgNbr,
            "ENTITYTYPE" => AuditField::EntityType,
            "ENTITYNBR" => AuditField::EntityNbr,
            "MINOR" => AuditField::Minor,
            "CLOSEDATE" => AuditField::CloseDate,
            "EMAILDATE" => AuditField::EmailDate,
            "MEMBERNAME" => AuditField::MemberName,
            "EMAILADDR" => AuditField::EmailAddr,
            "BALANCE" => AuditField::Balance,
            "NOTECLASSCD" | "FDI_NOTECLASSCD" => AuditField::NoteClassCd,
            "NOTEINACTIVEDATE" | "FDI_INACTIVE_DATE" => AuditField::NoteInactiveDate,
            "RESULT" => AuditField::Result,
            "EXCPYN" => AuditField::ExcpYn,
            _ => return None,
        };
        Some(field)
    }

    pub fn header(&self) -> &'static str {
        match self {
            AuditField::AcctNbr => "ACCTNBR",
            AuditField::PersNbr => "PERSNBR",
            AuditField::OrgNbr => "ORGNBR",
            AuditField::EntityType => "ENTITYTYPE",
            AuditField::EntityNbr => "ENTITYNBR",
            AuditField::Minor => "MINOR",
            AuditField::CloseDate => "CLOSEDATE",
            AuditField::EmailDate => "EMAILDATE",
            AuditField::MemberName => "MEMBERNAME",
            AuditField::EmailAddr => "EMAILADDR",
            AuditField::Balance => "BALANCE",
            AuditField::NoteClassCd => "NOTECLASSCD",
            AuditField::NoteInactiveDate => "NOTEINACTIVEDATE",
            AuditField::Result => "RESULT",
            AuditField::ExcpYn => "EXCPYN",
        }
    }

    pub fn render(&self, row: &AuditRecord) -> String {
        let pers = row.entity_type == EntityType::Pers;
        match self {
            AuditField::AcctNbr => row.account_id.to_string(),
            AuditField::PersNbr => if pers { row.entity_id.to_string() } else { String::new() },
            AuditField::OrgNbr => if pers { String::new() } else { row.entity_id.to_string() },
            AuditField::EntityType => row.entity_type.to_string(),
            AuditField::EntityNbr => row.entity_id.to_string(),
            AuditField::Minor => row.minor.clone().unwrap_or_default(),
            AuditField::CloseDate => row.close_date.map(format_date).unwrap_or_default(),
            AuditField::EmailDate => row.email_date.map(format_date).unwrap_or_default(),
            AuditField::MemberName => row.member_name.clone().unwrap_or_default(),
            AuditField::EmailAddr => row.email.clone().unwrap_or_default(),
            AuditField::Balance => row.balance.map(format_amount).unwrap_or_default(),
            AuditField::NoteClassCd => row.note_class.clone().unwrap_or_default(),
            AuditField::NoteInactiveDate => {
                row.note_inactive_date.map(format_date).unwrap_or_default()
            }
            AuditField::Result => row.result.clone(),
            AuditField::ExcpYn => if row.exception { "Y" } else { "N" }.to_string(),
        }
    }
}

fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{amount:.0}")
    } else {
        format!("{amount:.2}")
    }
}

/// One line of the audit file. Built once per record, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub account_id: AccountId,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub close_date: Option<NaiveDate>,
    pub minor: Option<String>,
    pub email: Option<String>,
    pub member_name: Option<String>,
    pub email_date: Option<NaiveDate>,
    pub balance: Option<f64>,
    pub note_class: Option<String>,
    pub note_inactive_date: Option<NaiveDate>,
    pub result: String,
    pub exception: bool,
}

impl AuditRecord {
    pub fn new(record: &Record, disposition: &Disposition, variant: PipelineVariant) -> Self {
        Self {
            account_id: record.account_id,
            entity_type: record.entity_type,
            entity_id: record.entity_id,
            close_date: record.close_date,
            minor: record.minor.clone(),
            email: record.email.clone(),
            member_name: record.member_name.clone(),
            email_date: record.email_date,
            balance: record.balance,
            note_class: record.note.as_ref().map(|n| n.class_code.clone()),
            note_inactive_date: record.note.as_ref().and_then(|n| n.inactive_date),
            result: disposition.result_text(variant),
            exception: disposition.is_exception(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportSettings {
    pub title: String,
    pub success_heading: String,
    pub fields: Vec<AuditField>,
    /// Write a `MODE:` line (commit vs report-only) under the selection line.
    pub show_mode: bool,
}

/// Header block values that vary per run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunHeader {
    pub run_date: NaiveDate,
    pub selection_label: String,
    pub report_only: bool,
}

pub struct AuditReporter<'a> {
    path: &'a Path,
    settings: &'a ReportSettings,
}

impl<'a> AuditReporter<'a> {
    pub fn new(path: &'a Path, settings: &'a ReportSettings) -> Self {
        Self { path, settings }
    }

    pub fn path(&self) -> &Path {
        self.path
    }

    /// Fail if a previous run's artifact is still in place.
    pub fn ensure_absent(&self) -> CloseoutResult<()> {
        if self.path.exists() {
            return Err(conflict(self.path));
        }
        Ok(())
    }

    pub fn write(&self, header: &RunHeader, records: &[AuditRecord]) -> CloseoutResult<()> {
        log::info!("audit: writing {}", self.path.display());
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => conflict(self.path),
                _ => CloseoutError::Io(e),
            })?;

        let mut out = SectionWriter::new(BufWriter::new(file));
        out.line(&self.settings.title)?;
        out.line(&format!("RUN DATE: {}", format_date(header.run_date)))?;
        out.line(&header.selection_label)?;
        if self.settings.show_mode {
            let mode = if header.report_only { "REPORT ONLY" } else { "COMMIT" };
            out.line(&format!("MODE: {mode}"))?;
        }
        out.blank()?;

        out.line(&self.settings.success_heading)?;
        let successes: Vec<&AuditRecord> = records.iter().filter(|r| !r.exception).collect();
        self.write_section(&mut out, &successes)?;
        out.blank()?;

        out.line(EXCEPTIONS_HEADING)?;
        let exceptions: Vec<&AuditRecord> = records.iter().filter(|r| r.exception).collect();
        self.write_section(&mut out, &exceptions)?;

        out.line(END_MARKER)?;
        out.finish()?;
        log::info!(
            "audit: {} successes, {} exceptions",
            successes.len(),
            exceptions.len()
        );
        Ok(())
    }

    fn write_section<W: Write>(
        &self,
        out: &mut SectionWriter<W>,
        rows: &[&AuditRecord],
    ) -> CloseoutResult<()> {
        if rows.is_empty() {
            out.line(NONE_MARKER)?;
        } else {
            out.record(self.settings.fields.iter().map(AuditField::header))?;
            for row in rows {
                out.record(self.settings.fields.iter().map(|f| f.render(row)))?;
            }
        }
        out.blank()
    }
}

fn conflict(path: &Path) -> CloseoutError {
    CloseoutError::ArtifactConflict {
        path: PathBuf::from(path),
    }
}

/// Writes CSV records and bare blank lines between sections.
struct SectionWriter<W: Write> {
    out: W,
}

impl<W: Write> SectionWriter<W> {
    fn new(out: W) -> Self {
        Self { out }
    }

    fn record<I, T>(&mut self, fields: I) -> CloseoutResult<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut csv = csv::WriterBuilder::new()
            .terminator(csv::Terminator::CRLF)
            .from_writer(Vec::new());
        csv.write_record(fields)?;
        let bytes = csv
            .into_inner()
            .map_err(|e| CloseoutError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
        self.out.write_all(&bytes)?;
        Ok(())
    }

    fn line(&mut self, text: &str) -> CloseoutResult<()> {
        self.record([text])
    }

    fn blank(&mut self) -> CloseoutResult<()> {
        self.out.write_all(b"\r\n")?;
        Ok(())
    }

    fn finish(mut self) -> CloseoutResult<()> {
        self.out.flush()?;
        Ok(())
    }
}
