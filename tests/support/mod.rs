//! Helpers shared by the socket-level tests

#![allow(dead_code)]

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use pigeonhole::{ServerConfig, ServerHandle, SmtpServer};

/// Configuration for a server on a free loopback port
pub fn test_config() -> ServerConfig {
    ServerConfig {
        hostname: "test.local".to_string(),
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        ..ServerConfig::default()
    }
}

pub fn start_test_server() -> (SmtpServer, ServerHandle) {
    start_server_with(test_config())
}

pub fn start_server_with(config: ServerConfig) -> (SmtpServer, ServerHandle) {
    let server = SmtpServer::new(config).unwrap();
    let handle = server.spawn().unwrap();
    (server, handle)
}

pub fn connect(addr: SocketAddr) -> Client<TcpStream> {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    Client::new(stream)
}

/// A line-oriented SMTP client over any stream
pub struct Client<S: Read + Write> {
    reader: BufReader<S>,
}

impl<S: Read + Write> Client<S> {
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Read one reply, joining the lines of a multi-line reply with `\n`
    pub fn read_reply(&mut self) -> io::Result<String> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            let line = line.trim_end().to_string();
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);
            if last {
                return Ok(lines.join("\n"));
            }
        }
    }

    pub fn send_line(&mut self, line: &str) -> io::Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\r\n")?;
        stream.flush()
    }

    /// Send a command and read its reply
    pub fn command(&mut self, line: &str) -> io::Result<String> {
        self.send_line(line)?;
        self.read_reply()
    }

    /// Run HELO, MAIL, RCPT and DATA, send `body` and the terminator, and
    /// return the final reply
    pub fn send_message(&mut self, from: &str, to: &str, body: &[&str]) -> io::Result<String> {
        self.command("HELO client.local")?;
        self.command(&format!("MAIL FROM:<{from}>"))?;
        self.command(&format!("RCPT TO:<{to}>"))?;
        let reply = self.command("DATA")?;
        assert!(reply.starts_with("354"), "{reply}");
        for line in body {
            self.send_line(line)?;
        }
        self.command(".")
    }

    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}
