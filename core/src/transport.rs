//! Mail transport capability and its SMTP implementation.

use crate::error::{CloseoutError, CloseoutResult};
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::commands::Ehlo;
use lettre::transport::smtp::extension::ClientId;
use lettre::{Address, Message};
use std::time::Duration;

/// A fully addressed HTML email, ready for any transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMail {
    pub from: Mailbox,
    pub to: Vec<Mailbox>,
    pub subject: String,
    pub html_body: String,
}

impl OutboundMail {
    pub fn new(
        from_name: &str,
        from_address: &str,
        to: &[String],
        subject: &str,
        html_body: String,
    ) -> CloseoutResult<Self> {
        let from = Mailbox::new(Some(from_name.to_string()), parse_address(from_address)?);
        let to = to
            .iter()
            .map(|addr| parse_address(addr).map(|a| Mailbox::new(None, a)))
            .collect::<CloseoutResult<Vec<_>>>()?;
        if to.is_empty() {
            return Err(CloseoutError::Mail("message has no recipients".into()));
        }
        Ok(Self {
            from,
            to,
            subject: subject.to_string(),
            html_body,
        })
    }

    /// Build the MIME `text/html` message.
    pub fn to_message(&self) -> CloseoutResult<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(self.subject.clone())
            .header(ContentType::TEXT_HTML);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        builder
            .body(self.html_body.clone())
            .map_err(|e| CloseoutError::Mail(e.to_string()))
    }
}

fn parse_address(raw: &str) -> CloseoutResult<Address> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| CloseoutError::Mail(format!("invalid address '{raw}': {e}")))
}

/// The SMTP conversation, one step per method.
/// The notifier drives the steps in a fixed order; see `Notifier::deliver`.
pub trait MailTransport {
    fn connect(&mut self, host: &str, port: u16) -> CloseoutResult<()>;
    fn ehlo(&mut self) -> CloseoutResult<()>;
    fn starttls(&mut self) -> CloseoutResult<()>;
    fn login(&mut self, user: &str, password: &str) -> CloseoutResult<()>;
    fn send(&mut self, mail: &OutboundMail) -> CloseoutResult<()>;
    /// Close the session. Never fails.
    fn quit(&mut self);
}

pub struct SmtpMailTransport {
    hello: ClientId,
    timeout: Duration,
    host: String,
    conn: Option<SmtpConnection>,
}

impl SmtpMailTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            hello: ClientId::default(),
            timeout,
            host: String::new(),
            conn: None,
        }
    }
}

impl Default for SmtpMailTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

fn mail_err(e: impl std::fmt::Display) -> CloseoutError {
    CloseoutError::Mail(e.to_string())
}

fn not_connected() -> CloseoutError {
    CloseoutError::Mail("SMTP session is not connected".into())
}

impl MailTransport for SmtpMailTransport {
    fn connect(&mut self, host: &str, port: u16) -> CloseoutResult<()> {
        log::info!("smtp: connecting to {host}:{port}");
        let conn = SmtpConnection::connect((host, port), Some(self.timeout), &self.hello, None, None)
            .map_err(mail_err)?;
        self.host = host.to_string();
        self.conn = Some(conn);
        Ok(())
    }

    // lettre already greets inside `connect` and `starttls` to learn the
    // server's extensions; this is the explicit EHLO of the fixed sequence.
    fn ehlo(&mut self) -> CloseoutResult<()> {
        let Self { hello, conn, .. } = self;
        conn.as_mut()
            .ok_or_else(not_connected)?
            .command(Ehlo::new(hello.clone()))
            .map(|_| ())
            .map_err(mail_err)
    }

    fn starttls(&mut self) -> CloseoutResult<()> {
        let Self { hello, conn, host, .. } = self;
        let tls = TlsParameters::new(host.clone()).map_err(mail_err)?;
        conn.as_mut()
            .ok_or_else(not_connected)?
            .starttls(&tls, hello)
            .map_err(mail_err)
    }

    fn login(&mut self, user: &str, password: &str) -> CloseoutResult<()> {
        log::info!("smtp: logging into {} as {user}", self.host);
        let credentials = Credentials::new(user.to_string(), password.to_string());
        self.conn
            .as_mut()
            .ok_or_else(not_connected)?
            .auth(&[Mechanism::Plain, Mechanism::Login], &credentials)
            .map(|_| ())
            .map_err(mail_err)
    }

    fn send(&mut self, mail: &OutboundMail) -> CloseoutResult<()> {
        let message = mail.to_message()?;
        self.conn
            .as_mut()
            .ok_or_else(not_connected)?
            .send(message.envelope(), &message.formatted())
            .map(|_| ())
            .map_err(mail_err)
    }

    fn quit(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.quit();
        }
    }
}
