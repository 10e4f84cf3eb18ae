//! SMTP session state machine
//!
//! [`SmtpSession`] holds no socket. The server feeds it one line at a time
//! and writes back whatever [`Action`] it returns, which keeps every ordering
//! rule testable without a network.

use crate::smtp::assembler::{EmailAssembler, Transaction};
use crate::smtp::commands::{self, DataHandler, DataLine, Verb};
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;

/// Represents the current state of an SMTP session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    /// Connected, greeting not sent yet
    Init,
    /// Greeting sent - ready for MAIL
    Ready,
    /// MAIL FROM received - ready for RCPT
    MailSet,
    /// RCPT TO received - ready for DATA
    RcptSet,
    /// DATA accepted - collecting lines until the terminator
    InData,
    /// QUIT received or connection gone
    Closed,
}

/// What the connection driver has to do after a line was processed
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send the reply and read the next line
    Reply(SmtpResponse),
    /// Line consumed as message data; nothing to send
    Collect,
    /// Send the reply, then perform the TLS handshake
    StartTls(SmtpResponse),
    /// Send the reply, then close the connection
    Close(SmtpResponse),
}

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Name announced in greeting and HELO replies
    pub hostname: String,
    /// Largest accepted message body in bytes
    pub max_message_size: usize,
    /// Whether STARTTLS may be offered on this connection
    pub starttls: bool,
    /// Whether the stream is already encrypted
    pub secure: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            max_message_size: SmtpLimits::MAX_DATA_SIZE,
            starttls: false,
            secure: false,
        }
    }
}

/// Manages the state and data for a single SMTP session
#[derive(Debug)]
pub struct SmtpSession {
    state: SmtpState,
    transaction: Transaction,
    data: Option<DataHandler>,
    client_domain: Option<String>,
    options: SessionOptions,
    assembler: EmailAssembler,
}

impl SmtpSession {
    /// Create a new SMTP session
    pub fn new(assembler: EmailAssembler, options: SessionOptions) -> Self {
        Self {
            state: SmtpState::Init,
            transaction: Transaction::default(),
            data: None,
            client_domain: None,
            options,
            assembler,
        }
    }

    pub fn state(&self) -> SmtpState {
        self.state
    }

    /// Sender of the transaction in progress
    pub fn sender(&self) -> Option<&str> {
        self.transaction.sender.as_deref()
    }

    /// Recipient of the transaction in progress
    pub fn recipient(&self) -> Option<&str> {
        self.transaction.recipient.as_deref()
    }

    /// Client domain from HELO/EHLO
    pub fn client_domain(&self) -> Option<&str> {
        self.client_domain.as_deref()
    }

    pub fn is_secure(&self) -> bool {
        self.options.secure
    }

    /// Produce the service greeting and move to [`SmtpState::Ready`]
    pub fn greet(&mut self) -> SmtpResponse {
        if self.state == SmtpState::Init {
            self.state = SmtpState::Ready;
        }
        SmtpResponse::greeting(&self.options.hostname)
    }

    /// Process one line received from the client, without its line ending.
    ///
    /// Errors are reported to the client by the caller; they never advance
    /// the state.
    pub fn process_line(&mut self, line: &str) -> Result<Action, SmtpError> {
        match self.state {
            SmtpState::InData => self.process_data_line(line),
            SmtpState::Closed => Err(SmtpError::InvalidState("session is closed".to_string())),
            _ => self.process_command(line),
        }
    }

    /// Handle a line that exceeded the maximum line length.
    ///
    /// Inside DATA the message is marked as failed and collection continues
    /// up to the terminator; elsewhere the error is returned for the client.
    pub fn reject_line(&mut self, err: SmtpError) -> Result<Action, SmtpError> {
        match (self.state, self.data.as_mut()) {
            (SmtpState::InData, Some(data)) => {
                data.reject(err);
                Ok(Action::Collect)
            }
            _ => Err(err),
        }
    }

    /// The stream has been upgraded to TLS: start over as after the greeting
    pub fn secure(&mut self) {
        self.options.secure = true;
        self.client_domain = None;
        self.reset();
    }

    /// The connection is gone. Returns the error for a DATA block that was
    /// cut short; such a message is dropped, never stored.
    pub fn disconnect(&mut self) -> Option<SmtpError> {
        let interrupted = self.state == SmtpState::InData;
        self.clear_transaction();
        self.state = SmtpState::Closed;

        interrupted.then_some(SmtpError::IncompleteData)
    }

    /// Reset the session to post-greeting state (clears transaction data)
    pub fn reset(&mut self) {
        self.clear_transaction();
        self.state = SmtpState::Ready;
    }

    fn clear_transaction(&mut self) {
        self.transaction = Transaction::default();
        self.data = None;
    }

    fn process_command(&mut self, command_line: &str) -> Result<Action, SmtpError> {
        let (verb, args) = Verb::parse(command_line)?;

        match verb {
            Verb::Quit => {
                self.clear_transaction();
                self.state = SmtpState::Closed;
                Ok(Action::Close(SmtpResponse::quit()))
            }
            _ if self.state == SmtpState::Init => Err(SmtpError::InvalidState(
                "greeting has not been sent".to_string(),
            )),
            Verb::Helo | Verb::Ehlo => self.handle_helo(verb, args),
            Verb::Mail => self.handle_mail(command_line),
            Verb::Rcpt => self.handle_rcpt(command_line),
            Verb::Data => self.handle_data(args),
            Verb::Rset => {
                self.reset();
                Ok(Action::Reply(SmtpResponse::ok()))
            }
            Verb::Noop => Ok(Action::Reply(SmtpResponse::ok())),
            Verb::StartTls => self.handle_starttls(args),
        }
    }

    fn handle_helo(&mut self, verb: Verb, args: &str) -> Result<Action, SmtpError> {
        let client_domain = commands::parse_domain(args)?;
        self.reset();

        let response = if verb == Verb::Ehlo {
            let mut capabilities = vec![format!("SIZE {}", self.options.max_message_size)];
            if self.options.starttls && !self.options.secure {
                capabilities.push("STARTTLS".to_string());
            }
            SmtpResponse::ehlo(&self.options.hostname, &client_domain, capabilities)
        } else {
            SmtpResponse::helo(&self.options.hostname, &client_domain)
        };

        self.client_domain = Some(client_domain);
        Ok(Action::Reply(response))
    }

    /// A valid MAIL always starts a fresh transaction
    fn handle_mail(&mut self, command_line: &str) -> Result<Action, SmtpError> {
        let sender = commands::parse_mail(command_line)?;

        self.clear_transaction();
        self.transaction.sender = Some(sender);
        self.state = SmtpState::MailSet;

        Ok(Action::Reply(SmtpResponse::ok()))
    }

    fn handle_rcpt(&mut self, command_line: &str) -> Result<Action, SmtpError> {
        match self.state {
            SmtpState::MailSet => {}
            SmtpState::RcptSet => {
                return Err(SmtpError::TooManyRecipients {
                    max: SmtpLimits::MAX_RECIPIENTS,
                });
            }
            _ => {
                return Err(SmtpError::InvalidState(
                    "RCPT command requires MAIL first".to_string(),
                ));
            }
        }

        let recipient = commands::parse_rcpt(command_line)?;
        self.transaction.recipient = Some(recipient);
        self.state = SmtpState::RcptSet;

        Ok(Action::Reply(SmtpResponse::ok()))
    }

    fn handle_data(&mut self, args: &str) -> Result<Action, SmtpError> {
        if self.state != SmtpState::RcptSet {
            return Err(SmtpError::InvalidState(
                "DATA command requires RCPT first".to_string(),
            ));
        }

        if !args.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "DATA command takes no arguments".to_string(),
            ));
        }

        self.data = Some(DataHandler::new(self.options.max_message_size));
        self.state = SmtpState::InData;

        Ok(Action::Reply(SmtpResponse::data_start()))
    }

    fn handle_starttls(&mut self, args: &str) -> Result<Action, SmtpError> {
        if !self.options.starttls {
            return Err(SmtpError::TlsUnavailable);
        }

        if self.options.secure {
            return Err(SmtpError::InvalidState("TLS already active".to_string()));
        }

        if !args.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "STARTTLS command takes no arguments".to_string(),
            ));
        }

        Ok(Action::StartTls(SmtpResponse::tls_ready()))
    }

    fn process_data_line(&mut self, line: &str) -> Result<Action, SmtpError> {
        let Some(data) = self.data.as_mut() else {
            self.reset();
            return Err(SmtpError::InvalidState(
                "Not in data collection mode".to_string(),
            ));
        };

        if data.push(line) == DataLine::Continue {
            return Ok(Action::Collect);
        }

        let body = self.data.take().map(DataHandler::finish);
        let mut transaction = std::mem::take(&mut self.transaction);
        self.reset();

        transaction.body = Some(body.unwrap_or(Err(SmtpError::IncompleteData))?);
        let message = self.assembler.assemble(transaction)?;

        Ok(Action::Reply(SmtpResponse::stored(message.subject())))
    }
}
