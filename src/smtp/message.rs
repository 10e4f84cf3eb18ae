//! Captured messages

use std::time::SystemTime;

/// A message captured by the server.
///
/// Messages are immutable once built; they are only ever read back from the
/// [`Inbox`](crate::Inbox).
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    from: String,
    to: String,
    subject: String,
    body: String,
    received_at: SystemTime,
}

impl Message {
    pub fn new(from: String, to: String, subject: String, body: String) -> Self {
        Self {
            from,
            to,
            subject,
            body,
            received_at: SystemTime::now(),
        }
    }

    /// The sender's address from MAIL FROM
    pub fn from(&self) -> &str {
        &self.from
    }

    /// The recipient's address from RCPT TO
    pub fn to(&self) -> &str {
        &self.to
    }

    /// Identifier assigned when the message was stored: the Unix time of
    /// assembly in seconds, as a decimal string. Not taken from any header.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The raw DATA payload
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }

    /// Get the size of the body in bytes
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Check if the body contains a specific text
    pub fn contains_text(&self, text: &str) -> bool {
        self.body.contains(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message::new(
            "sender@example.com".to_string(),
            "recipient@example.com".to_string(),
            "1700000000".to_string(),
            "Subject: Test\n\nHello World".to_string(),
        )
    }

    #[test]
    fn test_message_creation() {
        let message = message();

        assert_eq!(message.from(), "sender@example.com");
        assert_eq!(message.to(), "recipient@example.com");
        assert_eq!(message.subject(), "1700000000");
        assert_eq!(message.body(), "Subject: Test\n\nHello World");
        assert!(message.received_at() <= SystemTime::now());
    }

    #[test]
    fn test_contains_text() {
        let message = message();

        assert!(message.contains_text("Hello"));
        assert!(!message.contains_text("not found"));
        assert_eq!(message.size(), 26);
    }
}
