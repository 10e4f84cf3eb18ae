//! Turns a completed transaction into a stored message

use std::time::{SystemTime, UNIX_EPOCH};

use crate::smtp::error::SmtpError;
use crate::smtp::inbox::Inbox;
use crate::smtp::message::Message;

/// The pieces collected by MAIL, RCPT and DATA for one message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub body: Option<String>,
}

/// Builds messages from transactions and appends them to an inbox
#[derive(Debug, Clone)]
pub struct EmailAssembler {
    inbox: Inbox,
}

impl EmailAssembler {
    pub fn new(inbox: Inbox) -> Self {
        Self { inbox }
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    /// Store the transaction as a message.
    ///
    /// Only checks that sender, recipient and body are present; address
    /// syntax was already enforced by the command parsers. The subject is the
    /// Unix time of assembly in seconds.
    pub fn assemble(&self, transaction: Transaction) -> Result<Message, SmtpError> {
        let sender = transaction
            .sender
            .filter(|s| !s.is_empty())
            .ok_or(SmtpError::IncompleteTransaction("sender"))?;
        let recipient = transaction
            .recipient
            .filter(|r| !r.is_empty())
            .ok_or(SmtpError::IncompleteTransaction("recipient"))?;
        let body = transaction
            .body
            .ok_or(SmtpError::IncompleteTransaction("body"))?;

        let message = Message::new(sender, recipient, unix_timestamp(), body);
        self.inbox.add(message.clone());

        Ok(message)
    }
}

fn unix_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
        .to_string()
}
