//! Run configuration.
//!
//! `ConfigFile` is the on-disk JSON shape. `ConfigFile::validate` turns it into
//! the immutable `RunConfig` every component reads; nothing else reads process
//! environment or re-parses options.

use crate::{
    audit::{AuditField, ReportSettings},
    classifier::{ClassifierRules, DedupKey},
    error::{CloseoutError, CloseoutResult},
    gateway::CommitMode,
    selector::SelectionCriteria,
    updater::{UpdateKey, UpdateTarget},
};
use anyhow::Context;
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Where the run executes. Decided once by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    /// Email each eligible member a closed-account notice.
    MemberNotice,
    /// Flip a status field on each eligible account in one batch.
    StatusCleanup,
}

impl PipelineVariant {
    pub fn duplicate_text(&self) -> &'static str {
        match self {
            PipelineVariant::MemberNotice => "Email Already Sent",
            PipelineVariant::StatusCleanup => "Duplicate Record",
        }
    }

    pub fn default_success_heading(&self) -> &'static str {
        match self {
            PipelineVariant::MemberNotice => "EMAILS SENT",
            PipelineVariant::StatusCleanup => "ACCOUNTS UPDATED",
        }
    }

    pub fn default_dedup_key(&self) -> DedupKey {
        match self {
            PipelineVariant::MemberNotice => DedupKey::Email,
            PipelineVariant::StatusCleanup => DedupKey::Account,
        }
    }
}

// ── On-disk shape ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub variant: PipelineVariant,
    #[serde(default)]
    pub effective_date: Option<String>,
    #[serde(default)]
    pub full_cleanup: bool,
    #[serde(default)]
    pub report_only: bool,
    #[serde(default)]
    pub send_email: bool,
    #[serde(default = "default_minor_codes")]
    pub minor_codes: String,
    #[serde(default)]
    pub dedup_key: Option<DedupKey>,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    pub output: OutputSection,
    pub report: ReportSection,
    pub queries: QuerySection,
    #[serde(default)]
    pub checks: CheckSection,
    #[serde(default)]
    pub update: Option<UpdateSection>,
    #[serde(default)]
    pub email: EmailSection,
    #[serde(default)]
    pub smtp: SmtpSection,
    /// Directory relative paths resolve against (the config file's directory).
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    pub directory: PathBuf,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportSection {
    pub title: String,
    #[serde(default)]
    pub success_heading: Option<String>,
    pub csv_header: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuerySection {
    #[serde(default)]
    pub date_range: Vec<String>,
    #[serde(default)]
    pub full_cleanup: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckSection {
    /// Defaults to on for member notices, off for status cleanup.
    #[serde(default)]
    pub validate_email: Option<bool>,
    #[serde(default = "default_true")]
    pub balance: bool,
    #[serde(default = "default_note_class")]
    pub active_note_class: Option<String>,
}

impl Default for CheckSection {
    fn default() -> Self {
        Self {
            validate_email: None,
            balance: true,
            active_note_class: default_note_class(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateSection {
    pub table: String,
    pub field: String,
    pub key_column: String,
    /// Record identifier bound to `key_column`.
    #[serde(default = "default_update_key")]
    pub key_source: UpdateKey,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailSection {
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default)]
    pub test_address: Option<String>,
    #[serde(default)]
    pub failure_recipients: Vec<String>,
    #[serde(default = "default_failure_subject")]
    pub failure_subject: String,
    #[serde(default)]
    pub template_directory: Option<PathBuf>,
    #[serde(default)]
    pub template_file: Option<String>,
}

impl Default for EmailSection {
    fn default() -> Self {
        Self {
            from_address: default_from_address(),
            from_name: default_from_name(),
            subject: default_subject(),
            test_address: None,
            failure_recipients: Vec::new(),
            failure_subject: default_failure_subject(),
            template_directory: None,
            template_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmtpSection {
    #[serde(default)]
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl Default for SmtpSection {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: default_smtp_port(),
            user: String::new(),
            password: String::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_minor_codes() -> String {
    "NACL,NAIL,UAOE,UACL,INRV,INAU,INUA,OVCL,OVOE,UAIL".into()
}

fn default_time_zone() -> String {
    "America/Los_Angeles".into()
}

fn default_note_class() -> Option<String> {
    Some("8FDI".into())
}

fn default_from_address() -> String {
    "member.communications@firsttechfed.com".into()
}

fn default_from_name() -> String {
    "First Tech Federal Credit Union".into()
}

fn default_subject() -> String {
    "Your Closed Automobile Loan".into()
}

fn default_failure_subject() -> String {
    "Closed Account Cleanup Failures".into()
}

fn default_update_key() -> UpdateKey {
    UpdateKey::Account
}

fn default_smtp_port() -> u16 {
    587
}

// ── Validated shape ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct EmailSettings {
    pub from_address: String,
    pub from_name: String,
    pub subject: String,
    pub test_address: Option<String>,
    pub failure_recipients: Vec<String>,
    pub failure_subject: String,
    pub template_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub environment: Environment,
    pub variant: PipelineVariant,
    pub selection: SelectionCriteria,
    pub commit_mode: CommitMode,
    pub send_email: bool,
    pub minor_codes: String,
    pub time_zone: Tz,
    pub output_path: PathBuf,
    pub report: ReportSettings,
    /// Queries for the resolved selection mode.
    pub queries: Vec<String>,
    pub rules: ClassifierRules,
    pub update: Option<UpdateTarget>,
    pub email: EmailSettings,
    pub smtp: SmtpSettings,
}

impl RunConfig {
    pub fn is_report_only(&self) -> bool {
        self.commit_mode == CommitMode::Rollback
    }
}

impl ConfigFile {
    /// Read and parse a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let mut file: ConfigFile = serde_json::from_str(&content)
            .with_context(|| format!("Cannot parse {}", path.display()))?;
        file.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(file)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Check every option and build the immutable run configuration.
    pub fn validate(self, environment: Environment) -> CloseoutResult<RunConfig> {
        let selection =
            SelectionCriteria::resolve(self.effective_date.as_deref(), self.full_cleanup)?;

        // A full-population pass never commits.
        let commit_mode = if self.report_only || selection.is_full_cleanup() {
            CommitMode::Rollback
        } else {
            CommitMode::Commit
        };

        let time_zone: Tz = self
            .time_zone
            .parse()
            .map_err(|_| CloseoutError::config(format!("unknown time zone '{}'", self.time_zone)))?;

        if !self.output.file_name.to_lowercase().ends_with(".csv") {
            return Err(CloseoutError::config(format!(
                "output file name '{}' must end in .csv",
                self.output.file_name
            )));
        }
        let output_dir = self.resolve(&self.output.directory);
        if !output_dir.is_dir() {
            return Err(CloseoutError::config(format!(
                "output directory {} does not exist",
                output_dir.display()
            )));
        }
        let output_path = output_dir.join(&self.output.file_name);

        let fields = self
            .report
            .csv_header
            .iter()
            .map(|name| {
                AuditField::parse(name).ok_or_else(|| {
                    CloseoutError::config(format!("unknown audit header field '{name}'"))
                })
            })
            .collect::<CloseoutResult<Vec<_>>>()?;
        if fields.is_empty() {
            return Err(CloseoutError::config("report.csv_header must name at least one field"));
        }
        let report = ReportSettings {
            title: self.report.title.clone(),
            success_heading: self
                .report
                .success_heading
                .clone()
                .unwrap_or_else(|| self.variant.default_success_heading().to_string()),
            fields,
            show_mode: self.variant == PipelineVariant::StatusCleanup,
        };

        let queries = match selection {
            SelectionCriteria::DateRange { .. } => self.queries.date_range.clone(),
            SelectionCriteria::FullCleanup => self.queries.full_cleanup.clone(),
        };
        if queries.is_empty() {
            return Err(CloseoutError::config(format!(
                "no queries configured for {}",
                if selection.is_full_cleanup() { "full_cleanup" } else { "date_range" }
            )));
        }

        let update = match (&self.update, self.variant) {
            (Some(section), _) => Some(validate_update(section)?),
            (None, PipelineVariant::StatusCleanup) => {
                return Err(CloseoutError::config("status_cleanup requires an update section"))
            }
            (None, PipelineVariant::MemberNotice) => None,
        };

        if self.variant == PipelineVariant::MemberNotice && self.email.template_file.is_none() {
            return Err(CloseoutError::config("member_notice requires email.template_file"));
        }
        let template_path = self.email.template_file.as_ref().map(|file| {
            let dir = self
                .email
                .template_directory
                .as_deref()
                .map(|d| self.resolve(d))
                .unwrap_or_else(|| self.base_dir.clone());
            dir.join(file)
        });

        // A status flip keyed by entity touches every account of that entity, so
        // the dedup identity has to be the update identity.
        let dedup_key = match &update {
            Some(target) if self.variant == PipelineVariant::StatusCleanup => {
                let expected = match target.key {
                    UpdateKey::Account => DedupKey::Account,
                    UpdateKey::Entity => DedupKey::Entity,
                };
                let chosen = self.dedup_key.unwrap_or(expected);
                if chosen != expected {
                    return Err(CloseoutError::config(format!(
                        "dedup_key {chosen:?} does not match update.key_source {:?}",
                        target.key
                    )));
                }
                chosen
            }
            _ => self.dedup_key.unwrap_or_else(|| self.variant.default_dedup_key()),
        };

        let rules = ClassifierRules {
            dedup_key,
            validate_email: self
                .checks
                .validate_email
                .unwrap_or(self.variant == PipelineVariant::MemberNotice),
            check_balance: self.checks.balance,
            active_note_class: self
                .checks
                .active_note_class
                .clone()
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty()),
        };

        Ok(RunConfig {
            environment,
            variant: self.variant,
            selection,
            commit_mode,
            send_email: self.send_email,
            minor_codes: self.minor_codes,
            time_zone,
            output_path,
            report,
            queries,
            rules,
            update,
            email: EmailSettings {
                from_address: self.email.from_address,
                from_name: self.email.from_name,
                subject: self.email.subject,
                test_address: self.email.test_address.filter(|a| !a.trim().is_empty()),
                failure_recipients: self.email.failure_recipients,
                failure_subject: self.email.failure_subject,
                template_path,
            },
            smtp: SmtpSettings {
                server: self.smtp.server,
                port: self.smtp.port,
                user: self.smtp.user,
                password: self.smtp.password,
            },
        })
    }
}

fn validate_update(section: &UpdateSection) -> CloseoutResult<UpdateTarget> {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    let ident = IDENT.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap()
    });

    for (what, name) in [
        ("table", &section.table),
        ("field", &section.field),
        ("key_column", &section.key_column),
    ] {
        if !ident.is_match(name) {
            return Err(CloseoutError::config(format!(
                "update.{what} '{name}' is not a plain SQL identifier"
            )));
        }
    }

    Ok(UpdateTarget {
        table: section.table.clone(),
        field: section.field.clone(),
        key_column: section.key_column.clone(),
        key: section.key_source,
        value: section.value.clone(),
    })
}
