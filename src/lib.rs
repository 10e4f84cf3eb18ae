//! # Pigeonhole
//!
//! Pigeonhole is a small SMTP receiver that captures mail in memory.
//!
//! Point the code under test at it instead of a real mail server, then look
//! at what arrived.
//!
//! ## Quick Start
//!
//! ```rust
//! use pigeonhole::{ServerConfig, SmtpServer};
//!
//! let config = ServerConfig {
//!     bind_address: "127.0.0.1".parse().unwrap(),
//!     port: 0,
//!     ..ServerConfig::default()
//! };
//!
//! let server = SmtpServer::new(config).unwrap();
//! let handle = server.spawn().unwrap();
//!
//! // Application sends email to handle.local_addr()
//! // ...
//!
//! // Check the contents of the last email
//! if let Some(body) = server.latest_message() {
//!     println!("Received: {body}");
//! }
//!
//! handle.stop().unwrap();
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `HELO` / `EHLO` - Identify the client
//! - `MAIL FROM` - Specify the sender's address
//! - `RCPT TO` - Specify the destination (one per message)
//! - `DATA` - Send the email body
//! - `RSET` - Reset the current transaction
//! - `NOOP` - Do nothing
//! - `STARTTLS` - Upgrade the connection, when TLS is configured
//! - `QUIT` - Close connection
//!
//! ## Notes
//!
//! - Messages are kept in memory only.
//! - The body is stored exactly as received; headers are not parsed.
//! - The subject of a stored message is the Unix time it was stored at.
//! - SMTP authentication and relaying are not supported.
//!
//! ## Size Limits
//!
//! - User names: 64 characters max
//! - Domain names: 64 characters max
//! - Paths: 256 characters max
//! - Command lines: 512 characters max
//! - Text lines: 1000 characters max
//! - Messages: `max_message_size` bytes, 10 MiB by default

pub mod config;
pub mod logging;
mod smtp;

#[doc(hidden)]
pub use tracing;

pub use config::{ConfigError, ServerConfig, TlsConfig, TlsMode};
pub use smtp::tls::{SUPPORTED_PROTOCOLS, protocol_versions};
pub use smtp::{
    Action, DataHandler, DataLine, EmailAssembler, Inbox, Message, ServerHandle, SessionOptions,
    SmtpError, SmtpLimits, SmtpResponse, SmtpServer, SmtpSession, SmtpState, StatusListener,
    Transaction, parse_data, parse_mail, parse_rcpt,
};
