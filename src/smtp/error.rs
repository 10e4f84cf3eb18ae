//! Error types for the SMTP server

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid command")]
    InvalidCommand,

    #[error("Invalid state for command")]
    InvalidState(String),

    #[error("Invalid syntax")]
    InvalidSyntax(String),

    #[error("Line too long (max {max} characters)")]
    LineTooLong { max: usize },

    #[error("Path too long (max {max} characters)")]
    PathTooLong { max: usize },

    #[error("Too many recipients (max {max})")]
    TooManyRecipients { max: usize },

    #[error("Too much mail data (max {max} bytes)")]
    TooMuchData { max: usize },

    #[error("Domain name too long (max {max} characters)")]
    DomainTooLong { max: usize },

    #[error("User name too long (max {max} characters)")]
    UserTooLong { max: usize },

    #[error("Connection closed before end of data")]
    IncompleteData,

    #[error("Transaction is missing its {0}")]
    IncompleteTransaction(&'static str),

    #[error("TLS not available")]
    TlsUnavailable,

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Unsupported TLS protocol version {0:?}")]
    UnsupportedProtocol(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Idle timeout exceeded")]
    Timeout,

    #[error("Too many concurrent connections (max {max})")]
    TooManyConnections { max: usize },
}

/// SMTP size limits as defined in RFC 821
pub struct SmtpLimits;

impl SmtpLimits {
    /// Maximum length of a user name
    pub const USER_MAX_LENGTH: usize = 64;

    /// Maximum length of a domain name
    pub const DOMAIN_MAX_LENGTH: usize = 64;

    /// Maximum length of a path (reverse-path or forward-path)
    pub const PATH_MAX_LENGTH: usize = 256;

    /// Maximum length of a command line including CRLF
    pub const COMMAND_LINE_MAX_LENGTH: usize = 512;

    /// Maximum length of a reply line including CRLF
    pub const REPLY_LINE_MAX_LENGTH: usize = 512;

    /// Maximum length of a text line including CRLF
    pub const TEXT_LINE_MAX_LENGTH: usize = 1000;

    /// Recipients captured per message
    pub const MAX_RECIPIENTS: usize = 1;

    /// Default limit on the size of a single message body
    pub const MAX_DATA_SIZE: usize = 10 * 1024 * 1024;
}

/// Maps SMTP errors to appropriate response codes
impl SmtpError {
    pub fn to_response_code(&self) -> &'static str {
        match self {
            SmtpError::Io(_) => "421",
            SmtpError::Bind { .. } => "421",
            SmtpError::InvalidCommand => "500",
            SmtpError::InvalidState(_) => "503",
            SmtpError::InvalidSyntax(_) => "501",
            SmtpError::LineTooLong { .. } => "500",
            SmtpError::PathTooLong { .. } => "501",
            SmtpError::TooManyRecipients { .. } => "452",
            SmtpError::TooMuchData { .. } => "552",
            SmtpError::DomainTooLong { .. } => "501",
            SmtpError::UserTooLong { .. } => "501",
            SmtpError::IncompleteData => "451",
            SmtpError::IncompleteTransaction(_) => "451",
            SmtpError::TlsUnavailable => "454",
            SmtpError::Tls(_) => "454",
            SmtpError::UnsupportedProtocol(_) => "454",
            SmtpError::Config(_) => "421",
            SmtpError::Timeout => "421",
            SmtpError::TooManyConnections { .. } => "421",
        }
    }

    pub fn to_response_message(&self) -> String {
        match self {
            SmtpError::Io(_) | SmtpError::Bind { .. } | SmtpError::Config(_) => {
                "Service not available".to_string()
            }
            SmtpError::InvalidCommand => "Syntax error, command unrecognized".to_string(),
            SmtpError::InvalidState(msg) => format!("Bad sequence of commands: {msg}"),
            SmtpError::InvalidSyntax(msg) => format!("Syntax error: {msg}"),
            SmtpError::LineTooLong { max } => format!("Line too long (max {max} characters)"),
            SmtpError::PathTooLong { max } => format!("Path too long (max {max} characters)"),
            SmtpError::TooManyRecipients { max } => format!("Too many recipients (max {max})"),
            SmtpError::TooMuchData { max } => format!("Too much mail data (max {max} bytes)"),
            SmtpError::DomainTooLong { max } => {
                format!("Domain name too long (max {max} characters)")
            }
            SmtpError::UserTooLong { max } => {
                format!("User name too long (max {max} characters)")
            }
            SmtpError::IncompleteData => "Message incomplete, not stored".to_string(),
            SmtpError::IncompleteTransaction(part) => {
                format!("Transaction incomplete: missing {part}")
            }
            SmtpError::TlsUnavailable => "TLS not available".to_string(),
            SmtpError::Tls(_) | SmtpError::UnsupportedProtocol(_) => {
                "TLS negotiation failed".to_string()
            }
            SmtpError::Timeout => "Idle timeout, closing connection".to_string(),
            SmtpError::TooManyConnections { .. } => {
                "Too many connections, try again later".to_string()
            }
        }
    }

    /// Whether the error ends the session rather than being reported and
    /// recovered from
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SmtpError::Io(_)
                | SmtpError::Bind { .. }
                | SmtpError::Tls(_)
                | SmtpError::Config(_)
                | SmtpError::Timeout
                | SmtpError::TooManyConnections { .. }
        )
    }
}
