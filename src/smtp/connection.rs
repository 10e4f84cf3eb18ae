//! Client streams, plain or wrapped in TLS

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

use rustls::{ServerConfig, ServerConnection, StreamOwned};

use crate::smtp::error::SmtpError;

pub enum Connection {
    Plain { stream: TcpStream },
    Tls { stream: Box<StreamOwned<ServerConnection, TcpStream>> },
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self::Plain { stream }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }

    /// Run the server side of a TLS handshake over the plain stream.
    ///
    /// The handshake completes before this returns, so a client offering only
    /// disabled protocol versions fails here rather than on the first read.
    pub fn upgrade(self, config: Arc<ServerConfig>) -> Result<Self, SmtpError> {
        crate::internal!(level = DEBUG, "Upgrading connection ...");

        let Self::Plain { stream } = self else {
            return Err(SmtpError::InvalidState("TLS already active".to_string()));
        };

        let mut tls = StreamOwned::new(ServerConnection::new(config)?, stream);
        while tls.conn.is_handshaking() {
            tls.conn.complete_io(&mut tls.sock)?;
        }

        crate::internal!(
            level = DEBUG,
            "TLS established: {:?} {:?}",
            tls.conn.protocol_version(),
            tls.conn.negotiated_cipher_suite().map(|suite| suite.suite())
        );

        Ok(Self::Tls {
            stream: Box::new(tls),
        })
    }

    /// Close the connection, sending a TLS close_notify first if needed
    pub fn close(&mut self) {
        if let Self::Tls { stream } = self {
            stream.conn.send_close_notify();
            while stream.conn.wants_write() {
                if stream.conn.write_tls(&mut stream.sock).is_err() {
                    break;
                }
            }
        }
        let _ = self.tcp().shutdown(Shutdown::Both);
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain { stream } => stream,
            Self::Tls { stream } => stream.get_ref(),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain { stream } => stream.read(buf),
            Self::Tls { stream } => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain { stream } => stream.write(buf),
            Self::Tls { stream } => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain { stream } => stream.flush(),
            Self::Tls { stream } => stream.flush(),
        }
    }
}
