//! SMTP receiver implementation

pub mod assembler;
pub mod commands;
pub mod connection;
pub mod error;
pub mod inbox;
pub mod message;
pub mod response;
pub mod server;
pub mod session;
pub mod status;
pub mod tls;

pub use assembler::{EmailAssembler, Transaction};
pub use commands::{DataHandler, DataLine, parse_data, parse_mail, parse_rcpt};
pub use error::{SmtpError, SmtpLimits};
pub use inbox::Inbox;
pub use message::Message;
pub use response::SmtpResponse;
pub use server::{ServerHandle, SmtpServer};
pub use session::{Action, SessionOptions, SmtpSession, SmtpState};
pub use status::StatusListener;
