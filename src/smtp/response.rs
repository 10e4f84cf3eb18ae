//! SMTP replies

use std::fmt::Write;

use crate::smtp::error::SmtpError;

/// An SMTP reply that can be sent to a client
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpResponse {
    /// The SMTP reply code (e.g., "250", "354", "503")
    pub code: String,
    /// The human-readable message
    pub message: String,
    /// Extra lines for multi-line replies such as EHLO
    pub multiline: Option<Vec<String>>,
}

impl SmtpResponse {
    pub fn new(code: &str, message: &str) -> Self {
        Self::build(code, message, None)
    }

    /// A reply whose first line is `message`, followed by `lines`
    pub fn new_multiline(code: &str, message: &str, lines: Vec<String>) -> Self {
        Self::build(code, message, Some(lines))
    }

    fn build(code: &str, message: &str, multiline: Option<Vec<String>>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            multiline,
        }
    }

    /// 250 OK
    pub fn ok() -> Self {
        Self::new("250", "OK")
    }

    /// 220 service ready
    pub fn greeting(hostname: &str) -> Self {
        Self::new("220", &format!("{hostname} ESMTP Pigeonhole ready"))
    }

    pub fn helo(hostname: &str, client_domain: &str) -> Self {
        Self::new("250", &format!("{hostname} Hello {client_domain}"))
    }

    /// EHLO reply advertising the extensions in `capabilities`
    pub fn ehlo(hostname: &str, client_domain: &str, capabilities: Vec<String>) -> Self {
        let greeting = format!("{hostname} Hello {client_domain}");
        if capabilities.is_empty() {
            Self::new("250", &greeting)
        } else {
            Self::new_multiline("250", &greeting, capabilities)
        }
    }

    /// 354, sent after DATA is accepted
    pub fn data_start() -> Self {
        Self::new("354", "End data with <CR><LF>.<CR><LF>")
    }

    /// 250, sent once a message has been stored
    pub fn stored(id: &str) -> Self {
        Self::new("250", &format!("OK: message stored as {id}"))
    }

    /// 220, sent before the TLS handshake of STARTTLS
    pub fn tls_ready() -> Self {
        Self::new("220", "Ready to start TLS")
    }

    pub fn quit() -> Self {
        Self::new("221", "Bye")
    }

    /// Wire form, every line terminated by CRLF
    pub fn format(&self) -> String {
        let extra = self.multiline.as_deref().unwrap_or_default();
        let mut lines = std::iter::once(self.message.as_str())
            .chain(extra.iter().map(String::as_str))
            .peekable();

        let mut out = String::new();
        while let Some(line) = lines.next() {
            let separator = if lines.peek().is_some() { '-' } else { ' ' };
            let _ = write!(out, "{}{separator}{line}\r\n", self.code);
        }
        out
    }
}

impl From<&SmtpError> for SmtpResponse {
    fn from(err: &SmtpError) -> Self {
        Self::new(err.to_response_code(), &err.to_response_message())
    }
}
