//! Parsers for SMTP command lines and DATA blocks
//!
//! Every function here is pure: the same input always yields the same
//! address, body, or error. Deciding whether a command is legal in the
//! current session state is left to [`SmtpSession`](crate::SmtpSession).

use crate::smtp::error::{SmtpError, SmtpLimits};

/// The terminator line ending a DATA block
pub const DATA_TERMINATOR: &str = ".";

/// Recognised SMTP verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Helo,
    Ehlo,
    Mail,
    Rcpt,
    Data,
    Rset,
    Noop,
    Quit,
    StartTls,
}

impl Verb {
    /// Split a command line into its verb and the remaining arguments
    pub fn parse(command_line: &str) -> Result<(Self, &str), SmtpError> {
        // The limit counts the CRLF the reader has already stripped
        if command_line.len() + 2 > SmtpLimits::COMMAND_LINE_MAX_LENGTH {
            return Err(SmtpError::LineTooLong {
                max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
            });
        }

        let command_line = command_line.trim();
        let (word, args) = match command_line.split_once(char::is_whitespace) {
            Some((word, args)) => (word, args.trim()),
            None => (command_line, ""),
        };

        let verb = match word.to_ascii_uppercase().as_str() {
            "HELO" => Verb::Helo,
            "EHLO" => Verb::Ehlo,
            "MAIL" => Verb::Mail,
            "RCPT" => Verb::Rcpt,
            "DATA" => Verb::Data,
            "RSET" => Verb::Rset,
            "NOOP" => Verb::Noop,
            "QUIT" => Verb::Quit,
            "STARTTLS" => Verb::StartTls,
            _ => return Err(SmtpError::InvalidCommand),
        };

        Ok((verb, args))
    }
}

/// Parse `MAIL FROM:<address>` and return the sender address
pub fn parse_mail(command_line: &str) -> Result<String, SmtpError> {
    let path = strip_keyword(command_line.trim(), "MAIL")
        .map(str::trim_start)
        .and_then(|args| strip_keyword(args, "FROM:"))
        .ok_or_else(|| {
            SmtpError::InvalidSyntax("MAIL command must be 'MAIL FROM:<address>'".to_string())
        })?;

    extract_address(path, "FROM")
}

/// Parse `RCPT TO:<address>` and return the recipient address
pub fn parse_rcpt(command_line: &str) -> Result<String, SmtpError> {
    let path = strip_keyword(command_line.trim(), "RCPT")
        .map(str::trim_start)
        .and_then(|args| strip_keyword(args, "TO:"))
        .ok_or_else(|| {
            SmtpError::InvalidSyntax("RCPT command must be 'RCPT TO:<address>'".to_string())
        })?;

    extract_address(path, "TO")
}

/// Parse the domain argument of HELO/EHLO
pub fn parse_domain(args: &str) -> Result<String, SmtpError> {
    let domain = args
        .split_whitespace()
        .next()
        .ok_or_else(|| SmtpError::InvalidSyntax("HELO requires domain argument".to_string()))?;

    if domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
        return Err(SmtpError::DomainTooLong {
            max: SmtpLimits::DOMAIN_MAX_LENGTH,
        });
    }

    Ok(domain.to_string())
}

/// Collect a DATA block from a stream of lines.
///
/// Lines are kept verbatim and joined with `\n`; the terminator is not part
/// of the body. Running out of lines before the terminator is an error, so a
/// truncated message is never mistaken for a complete one.
pub fn parse_data<I, S>(lines: I) -> Result<String, SmtpError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut handler = DataHandler::new(SmtpLimits::MAX_DATA_SIZE);
    for line in lines {
        if handler.push(line.as_ref()) == DataLine::End {
            return handler.finish();
        }
    }

    Err(SmtpError::IncompleteData)
}

/// Outcome of feeding one line to a [`DataHandler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLine {
    Continue,
    End,
}

/// Incremental DATA collector used while a session is in DATA mode.
///
/// A size violation does not stop collection: the rest of the block is
/// drained up to the terminator and the violation is reported by
/// [`DataHandler::finish`].
#[derive(Debug)]
pub struct DataHandler {
    lines: Vec<String>,
    size: usize,
    max_size: usize,
    failure: Option<SmtpError>,
}

impl DataHandler {
    pub fn new(max_size: usize) -> Self {
        Self {
            lines: Vec::new(),
            size: 0,
            max_size,
            failure: None,
        }
    }

    /// Feed one line, without its line ending
    pub fn push(&mut self, line: &str) -> DataLine {
        if line == DATA_TERMINATOR {
            return DataLine::End;
        }

        if self.failure.is_some() {
            return DataLine::Continue;
        }

        let line_size = line.len() + 2; // +2 for CRLF
        if line_size > SmtpLimits::TEXT_LINE_MAX_LENGTH {
            self.reject(SmtpError::LineTooLong {
                max: SmtpLimits::TEXT_LINE_MAX_LENGTH,
            });
        } else if self.size + line_size > self.max_size {
            self.reject(SmtpError::TooMuchData { max: self.max_size });
        } else {
            self.lines.push(line.to_string());
            self.size += line_size;
        }

        DataLine::Continue
    }

    /// Mark the block as failed; later lines are discarded
    pub fn reject(&mut self, err: SmtpError) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        self.lines = Vec::new();
    }

    /// Bytes collected so far, counting CRLF line endings
    pub fn size(&self) -> usize {
        self.size
    }

    /// The joined body, or the first violation seen while collecting
    pub fn finish(self) -> Result<String, SmtpError> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self.lines.join("\n")),
        }
    }
}

/// Case-insensitive prefix strip
fn strip_keyword<'a>(input: &'a str, keyword: &str) -> Option<&'a str> {
    input
        .get(..keyword.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(keyword))
        .map(|_| &input[keyword.len()..])
}

/// Pull the address out of `<address>`, ignoring any ESMTP parameters after it
fn extract_address(path: &str, field: &str) -> Result<String, SmtpError> {
    let missing_brackets = || {
        SmtpError::InvalidSyntax(format!("{field} address must be enclosed in angle brackets"))
    };

    let rest = path.trim_start().strip_prefix('<').ok_or_else(missing_brackets)?;
    let (addr, params) = rest.split_once('>').ok_or_else(missing_brackets)?;

    if !params.is_empty() && !params.starts_with(char::is_whitespace) {
        return Err(SmtpError::InvalidSyntax(format!(
            "unexpected text after {field} address"
        )));
    }

    if addr.len() > SmtpLimits::PATH_MAX_LENGTH {
        return Err(SmtpError::PathTooLong {
            max: SmtpLimits::PATH_MAX_LENGTH,
        });
    }

    if addr.is_empty() {
        return Err(SmtpError::InvalidSyntax(format!(
            "{field} address cannot be empty"
        )));
    }

    validate_email_address(addr)?;

    Ok(addr.to_string())
}

/// Validate email address format and size limits
fn validate_email_address(addr: &str) -> Result<(), SmtpError> {
    let Some((user_part, domain_part)) = addr.rsplit_once('@') else {
        return Err(SmtpError::InvalidSyntax(
            "Email address must contain @ symbol".to_string(),
        ));
    };

    if user_part.len() > SmtpLimits::USER_MAX_LENGTH {
        return Err(SmtpError::UserTooLong {
            max: SmtpLimits::USER_MAX_LENGTH,
        });
    }

    if domain_part.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
        return Err(SmtpError::DomainTooLong {
            max: SmtpLimits::DOMAIN_MAX_LENGTH,
        });
    }

    if user_part.is_empty() || domain_part.is_empty() {
        return Err(SmtpError::InvalidSyntax(
            "Invalid email address format".to_string(),
        ));
    }

    if addr.chars().any(|c| c.is_whitespace() || c == '<') {
        return Err(SmtpError::InvalidSyntax(
            "Email address contains invalid characters".to_string(),
        ));
    }

    Ok(())
}
