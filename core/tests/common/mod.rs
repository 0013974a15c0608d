//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use chrono::NaiveDate;
use closeout_core::{
    clock::RunClock,
    config::{ConfigFile, Environment, RunConfig},
    error::{CloseoutError, CloseoutResult},
    gateway::{BatchFailure, BatchOutcome, CommitMode, DatabaseGateway, NamedParams, SqliteGateway},
    notifier::{JinjaTemplate, Notifier, TemplateRenderer},
    record::{Row, SqlValue},
    transport::{MailTransport, OutboundMail},
};
use rusqlite::params;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

pub const SCHEMA: &str = include_str!("../fixtures/dna_schema.sql");

pub fn data_path(relative: &str) -> String {
    format!("{}/../data/{relative}", env!("CARGO_MANIFEST_DIR"))
}

/// The day every test run pretends it is.
pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, 28).unwrap()
}

pub fn fixed_clock() -> RunClock {
    RunClock::fixed(chrono_tz::America::Los_Angeles, today())
}

// ── Config ─────────────────────────────────────────────────────────

/// Load a shipped sample config, pointed at `out_dir`.
pub fn sample_config(name: &str, out_dir: &Path) -> ConfigFile {
    let mut file = ConfigFile::load(data_path(&format!("config/{name}"))).expect("sample config");
    file.output.directory = out_dir.to_path_buf();
    file
}

pub fn notice_config(out_dir: &Path, send_email: bool) -> RunConfig {
    let mut file = sample_config("member_notice.json", out_dir);
    file.effective_date = Some("07/23/2025".into());
    file.send_email = send_email;
    file.email.test_address = None;
    file.smtp.server = "TEST_SMTP_HOST".into();
    file.smtp.user = "smtp-user".into();
    file.smtp.password = "smtp-password".into();
    file.validate(Environment::Production).expect("valid notice config")
}

pub fn cleanup_config(out_dir: &Path, report_only: bool) -> RunConfig {
    let mut file = sample_config("status_cleanup.json", out_dir);
    file.effective_date = Some("07/01/2025".into());
    file.report_only = report_only;
    file.smtp.server = "TEST_SMTP_HOST".into();
    file.validate(Environment::Production).expect("valid cleanup config")
}

pub fn notice_template() -> Box<dyn TemplateRenderer> {
    let path = data_path("templates/closed_loan_notice.html");
    Box::new(JinjaTemplate::from_file(Path::new(&path)).expect("template"))
}

// ── Mail ───────────────────────────────────────────────────────────

/// Everything a `FakeTransport` saw, shared with the test body.
#[derive(Default)]
pub struct MailLog {
    pub steps: Vec<String>,
    pub endpoint: Option<String>,
    pub user: Option<String>,
    pub sent: Vec<OutboundMail>,
}

pub struct FakeTransport {
    log: Rc<RefCell<MailLog>>,
    fail_at: Option<&'static str>,
}

impl FakeTransport {
    pub fn new() -> (Self, Rc<RefCell<MailLog>>) {
        let log = Rc::new(RefCell::new(MailLog::default()));
        (Self { log: log.clone(), fail_at: None }, log)
    }

    /// A transport whose `step` always errors.
    pub fn failing_at(step: &'static str) -> (Self, Rc<RefCell<MailLog>>) {
        let (mut transport, log) = Self::new();
        transport.fail_at = Some(step);
        (transport, log)
    }

    fn step(&mut self, name: &str) -> CloseoutResult<()> {
        self.log.borrow_mut().steps.push(name.to_string());
        if self.fail_at == Some(name) {
            return Err(CloseoutError::Mail(format!("{name} refused")));
        }
        Ok(())
    }
}

impl MailTransport for FakeTransport {
    fn connect(&mut self, host: &str, port: u16) -> CloseoutResult<()> {
        self.log.borrow_mut().endpoint = Some(format!("{host}:{port}"));
        self.step("connect")
    }

    fn ehlo(&mut self) -> CloseoutResult<()> {
        self.step("ehlo")
    }

    fn starttls(&mut self) -> CloseoutResult<()> {
        self.step("starttls")
    }

    fn login(&mut self, user: &str, _password: &str) -> CloseoutResult<()> {
        self.log.borrow_mut().user = Some(user.to_string());
        self.step("login")
    }

    fn send(&mut self, mail: &OutboundMail) -> CloseoutResult<()> {
        self.step("send")?;
        self.log.borrow_mut().sent.push(mail.clone());
        Ok(())
    }

    fn quit(&mut self) {
        self.log.borrow_mut().steps.push("quit".into());
    }
}

pub fn notifier_for(config: &RunConfig, transport: FakeTransport) -> Notifier {
    Notifier::new(config, 2025, Box::new(transport), Some(notice_template()))
}

// ── Database ───────────────────────────────────────────────────────

pub fn dna_gateway() -> SqliteGateway {
    let gateway = SqliteGateway::in_memory().expect("in-memory db");
    gateway.connection().execute_batch(SCHEMA).expect("schema");
    gateway
}

/// Create a file-backed database under `dir` and return its path.
pub fn dna_file(dir: &Path) -> String {
    let path = dir.join("dna.db");
    let conn = rusqlite::Connection::open(&path).expect("create db");
    conn.execute_batch(SCHEMA).expect("schema");
    path.to_string_lossy().into_owned()
}

pub struct AcctRow<'a> {
    pub acctnbr: i64,
    pub minor: &'a str,
    pub closedate: &'a str,
    pub persnbr: Option<i64>,
    pub orgnbr: Option<i64>,
    pub balance: f64,
    pub noteclasscd: Option<&'a str>,
    pub noteinactivedate: Option<&'a str>,
}

impl<'a> AcctRow<'a> {
    pub fn pers(acctnbr: i64, persnbr: i64) -> Self {
        Self {
            acctnbr,
            minor: "INAU",
            closedate: "2025-07-14",
            persnbr: Some(persnbr),
            orgnbr: None,
            balance: 0.0,
            noteclasscd: None,
            noteinactivedate: None,
        }
    }

    pub fn org(acctnbr: i64, orgnbr: i64) -> Self {
        Self {
            persnbr: None,
            orgnbr: Some(orgnbr),
            ..Self::pers(acctnbr, 0)
        }
    }
}

pub fn insert_acct(gateway: &SqliteGateway, row: &AcctRow) {
    gateway
        .connection()
        .execute(
            "INSERT INTO acct (acctnbr, mjaccttypcd, currmiacctyp, curracctstatcd, closedate,
                               taxrptforpersnbr, taxrptfororgnbr, noteclasscd, noteinactivedate, balance)
             VALUES (?1, 'CNS', ?2, 'CLS', ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.acctnbr,
                row.minor,
                row.closedate,
                row.persnbr,
                row.orgnbr,
                row.noteclasscd,
                row.noteinactivedate,
                row.balance,
            ],
        )
        .expect("insert acct");
}

pub fn insert_pers(gateway: &SqliteGateway, persnbr: i64, first: &str, last: &str, email: &str) {
    gateway
        .connection()
        .execute(
            "INSERT INTO pers (persnbr, firstname, lastname, emailaddr) VALUES (?1, ?2, ?3, ?4)",
            params![persnbr, first, last, email],
        )
        .expect("insert pers");
}

pub fn put_on_hold(gateway: &SqliteGateway, acctnbr: i64) {
    gateway
        .connection()
        .execute("INSERT INTO acct_hold (acctnbr) VALUES (?1)", params![acctnbr])
        .expect("insert hold");
}

pub fn closeout_status(gateway: &SqliteGateway, acctnbr: i64) -> Option<String> {
    gateway
        .connection()
        .query_row(
            "SELECT closeoutstatcd FROM acct WHERE acctnbr = ?1",
            params![acctnbr],
            |r| r.get(0),
        )
        .expect("select status")
}

/// A gateway serving canned rows. Records every batch it is asked to write.
pub struct StaticGateway {
    rows: Vec<Row>,
    fail_offsets: Vec<usize>,
    pub writes: Rc<RefCell<Vec<(String, Vec<NamedParams>, CommitMode)>>>,
}

impl StaticGateway {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            fail_offsets: Vec::new(),
            writes: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn failing(mut self, offsets: &[usize]) -> Self {
        self.fail_offsets = offsets.to_vec();
        self
    }
}

impl DatabaseGateway for StaticGateway {
    fn select(&mut self, _sql: &str, _params: &NamedParams) -> CloseoutResult<Vec<Row>> {
        Ok(self.rows.clone())
    }

    fn batch_write(
        &mut self,
        sql: &str,
        rows: &[NamedParams],
        mode: CommitMode,
    ) -> CloseoutResult<BatchOutcome> {
        self.writes
            .borrow_mut()
            .push((sql.to_string(), rows.to_vec(), mode));
        let failures: Vec<BatchFailure> = self
            .fail_offsets
            .iter()
            .map(|&offset| BatchFailure {
                offset,
                message: format!("ORA-20001: row {offset} rejected"),
            })
            .collect();
        let committed = match mode {
            CommitMode::Commit => rows.len().saturating_sub(failures.len()),
            CommitMode::Rollback => 0,
        };
        Ok(BatchOutcome {
            submitted: rows.len(),
            failures,
            committed,
        })
    }
}

/// Build a gateway row from `(column, value)` pairs.
pub fn row(cells: &[(&str, SqlValue)]) -> Row {
    cells
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

pub fn int(value: i64) -> SqlValue {
    SqlValue::Integer(value)
}

/// Audit file lines, without the trailing newline.
pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .expect("audit file")
        .lines()
        .map(str::to_string)
        .collect()
}
