//! Notifier: member notices and the operations failure summary.
//!
//! Transport sequence is fixed: connect, EHLO, STARTTLS, EHLO, login, send.
//! Every failure inside it is caught here and becomes `Email Failed`; nothing
//! raised by the mail path can abort a run.

use crate::{
    config::{EmailSettings, Environment, RunConfig, SmtpSettings},
    error::CloseoutResult,
    record::Record,
    transport::{MailTransport, OutboundMail},
    types::format_date,
    updater::UpdateRow,
};
use minijinja::{AutoEscape, Environment as JinjaEnv, Value};
use serde::Serialize;
use std::path::Path;

pub const EMAIL_SENT: &str = "Email Sent";
pub const EMAIL_SEND_DISABLED: &str = "Email Send Disabled";
pub const EMAIL_FAILED: &str = "Email Failed";
pub const NO_RECIPIENTS: &str = "No Recipients Configured";
pub const NO_FAILURES: &str = "No Failures";

/// What happened to one send attempt. `message` becomes the RESULT text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub sent: bool,
    pub message: String,
}

impl SendOutcome {
    fn sent() -> Self {
        Self { sent: true, message: EMAIL_SENT.into() }
    }

    fn skipped(message: &str) -> Self {
        Self { sent: false, message: message.into() }
    }
}

/// Values available to the member notice template.
#[derive(Debug, Clone, Serialize)]
pub struct NoticeData {
    pub membername: String,
    pub emaildate: String,
    pub year: String,
}

pub trait TemplateRenderer {
    fn render(&self, data: &NoticeData) -> CloseoutResult<String>;
}

/// A Jinja template rendered with HTML auto-escaping.
pub struct JinjaTemplate {
    env: JinjaEnv<'static>,
    source: String,
}

impl JinjaTemplate {
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            env: html_env(),
            source: source.into(),
        }
    }

    pub fn from_file(path: &Path) -> CloseoutResult<Self> {
        Ok(Self::from_source(std::fs::read_to_string(path)?))
    }
}

impl TemplateRenderer for JinjaTemplate {
    /// `emaildate` and `year` are produced here, not read from member data, so
    /// they bypass HTML escaping; the member name does not.
    fn render(&self, data: &NoticeData) -> CloseoutResult<String> {
        let ctx = minijinja::context! {
            membername => &data.membername,
            emaildate => Value::from_safe_string(data.emaildate.clone()),
            year => Value::from_safe_string(data.year.clone()),
        };
        Ok(self.env.render_str(&self.source, ctx)?)
    }
}

fn html_env() -> JinjaEnv<'static> {
    let mut env = JinjaEnv::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    env
}

const FAILURE_SUMMARY_TEMPLATE: &str = r#"<html>
<body>
<p>The closed account cleanup run could not update {{ failures|length }} account(s).</p>
<table border="1" cellpadding="4">
<tr><th>ACCTNBR</th><th>ENTITY</th><th>CLOSEDATE</th><th>ERROR</th></tr>
{% for f in failures %}<tr><td>{{ f.account }}</td><td>{{ f.entity }}</td><td>{{ f.close_date }}</td><td>{{ f.error }}</td></tr>
{% endfor %}</table>
</body>
</html>
"#;

#[derive(Serialize)]
struct FailureLine {
    account: String,
    entity: String,
    close_date: Value,
    error: String,
}

pub struct Notifier {
    environment: Environment,
    send_enabled: bool,
    email: EmailSettings,
    smtp: SmtpSettings,
    year: i32,
    transport: Box<dyn MailTransport>,
    template: Option<Box<dyn TemplateRenderer>>,
}

impl Notifier {
    pub fn new(
        config: &RunConfig,
        year: i32,
        transport: Box<dyn MailTransport>,
        template: Option<Box<dyn TemplateRenderer>>,
    ) -> Self {
        Self {
            environment: config.environment,
            send_enabled: config.send_email,
            email: config.email.clone(),
            smtp: config.smtp.clone(),
            year,
            transport,
            template,
        }
    }

    fn disabled(&self) -> bool {
        self.environment == Environment::Local || !self.send_enabled
    }

    fn recipients(&self, real: &[String]) -> Vec<String> {
        match &self.email.test_address {
            Some(test) => vec![test.clone()],
            None => real.to_vec(),
        }
    }

    /// Send the closed-account notice to one member.
    pub fn send_member_notice(&mut self, record: &Record) -> SendOutcome {
        if self.disabled() {
            return SendOutcome::skipped(EMAIL_SEND_DISABLED);
        }

        let to = self.recipients(&[record.email.clone().unwrap_or_default()]);
        let data = NoticeData {
            membername: record.member_name.clone().unwrap_or_default(),
            emaildate: record.email_date.map(format_date).unwrap_or_default(),
            year: self.year.to_string(),
        };

        let result = self.compose_notice(&data, &to).and_then(|mail| self.deliver(&mail));
        match result {
            Ok(()) => SendOutcome::sent(),
            Err(e) => {
                log::warn!(
                    "notifier: sending to {} for account {} failed: {e}",
                    to.join(", "),
                    record.account_id
                );
                SendOutcome::skipped(EMAIL_FAILED)
            }
        }
    }

    fn compose_notice(&self, data: &NoticeData, to: &[String]) -> CloseoutResult<OutboundMail> {
        let body = match &self.template {
            Some(template) => template.render(data)?,
            None => String::new(),
        };
        OutboundMail::new(
            &self.email.from_name,
            &self.email.from_address,
            to,
            &self.email.subject,
            body,
        )
    }

    /// One message to operations listing every row the batch could not update.
    pub fn send_failure_summary(&mut self, failures: &[UpdateRow]) -> SendOutcome {
        if failures.is_empty() {
            return SendOutcome::skipped(NO_FAILURES);
        }
        if self.disabled() {
            return SendOutcome::skipped(EMAIL_SEND_DISABLED);
        }
        if self.email.failure_recipients.is_empty() {
            return SendOutcome::skipped(NO_RECIPIENTS);
        }

        let to = self.recipients(&self.email.failure_recipients);
        let result = self.compose_summary(failures, &to).and_then(|mail| self.deliver(&mail));
        match result {
            Ok(()) => SendOutcome::sent(),
            Err(e) => {
                log::warn!("notifier: failure summary to {} failed: {e}", to.join(", "));
                SendOutcome::skipped(EMAIL_FAILED)
            }
        }
    }

    fn compose_summary(&self, failures: &[UpdateRow], to: &[String]) -> CloseoutResult<OutboundMail> {
        let lines: Vec<FailureLine> = failures
            .iter()
            .map(|f| FailureLine {
                account: f.account_id.to_string(),
                entity: format!("{} {}", f.entity_type, f.entity_id),
                close_date: Value::from_safe_string(
                    f.close_date.map(format_date).unwrap_or_default(),
                ),
                error: f.error.clone().unwrap_or_default(),
            })
            .collect();
        let body = html_env().render_str(
            FAILURE_SUMMARY_TEMPLATE,
            minijinja::context! { failures => lines },
        )?;
        OutboundMail::new(
            &self.email.from_name,
            &self.email.from_address,
            to,
            &self.email.failure_subject,
            body,
        )
    }

    /// Run the SMTP conversation; the session is closed on every path.
    fn deliver(&mut self, mail: &OutboundMail) -> CloseoutResult<()> {
        let result = self.converse(mail);
        self.transport.quit();
        result
    }

    fn converse(&mut self, mail: &OutboundMail) -> CloseoutResult<()> {
        let smtp = &self.smtp;
        let transport = self.transport.as_mut();
        transport.connect(&smtp.server, smtp.port)?;
        transport.ehlo()?;
        transport.starttls()?;
        transport.ehlo()?;
        transport.login(&smtp.user, &smtp.password)?;
        log::debug!("notifier: sending '{}'", mail.subject);
        transport.send(mail)
    }
}
