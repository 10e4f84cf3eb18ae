//! SMTP server implementation

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{ServerConfig, TlsMode};
use crate::smtp::assembler::EmailAssembler;
use crate::smtp::connection::Connection;
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::inbox::Inbox;
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::{Action, SessionOptions, SmtpSession, SmtpState};
use crate::smtp::status::StatusListener;
use crate::smtp::tls;
use crate::{incoming, internal, outgoing};

/// State shared by the accept loop, every session thread and every clone of
/// the server
struct Shared {
    config: ServerConfig,
    tls: Option<Arc<rustls::ServerConfig>>,
    assembler: EmailAssembler,
    listeners: Mutex<Vec<StatusListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
    stopping: AtomicBool,
    active: AtomicUsize,
}

/// SMTP server that accepts connections and stores every received message
/// in its [`Inbox`].
///
/// Cloning the server is cheap; clones control the same listener and share
/// the same inbox.
#[derive(Clone)]
pub struct SmtpServer {
    shared: Arc<Shared>,
}

impl SmtpServer {
    /// Create a server with a fresh, empty inbox
    pub fn new(config: ServerConfig) -> Result<Self, SmtpError> {
        Self::with_inbox(config, Inbox::new())
    }

    /// Create a server that stores messages in an existing inbox.
    ///
    /// Fails when the TLS section cannot be turned into a usable TLS setup.
    pub fn with_inbox(config: ServerConfig, inbox: Inbox) -> Result<Self, SmtpError> {
        let tls = config.tls.as_ref().map(tls::server_config).transpose()?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                tls,
                assembler: EmailAssembler::new(inbox),
                listeners: Mutex::new(Vec::new()),
                local_addr: Mutex::new(None),
                stopping: AtomicBool::new(false),
                active: AtomicUsize::new(0),
            }),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn inbox(&self) -> &Inbox {
        self.shared.assembler.inbox()
    }

    /// Body of the most recently stored message
    pub fn latest_message(&self) -> Option<String> {
        self.inbox().newest().map(|m| m.body().to_string())
    }

    /// Subject (storage timestamp) of the most recently stored message
    pub fn latest_subject(&self) -> Option<String> {
        self.inbox().newest().map(|m| m.subject().to_string())
    }

    /// Register a listener for start/stop notifications.
    ///
    /// Listeners run while the listener list is locked, so a callback must not
    /// register further listeners.
    pub fn add_status_listener(&self, listener: StatusListener) {
        lock(&self.shared.listeners).push(listener);
    }

    /// Address the server is bound to, once bound
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.shared.local_addr)
    }

    /// Number of sessions currently running
    pub fn active_sessions(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Bind the listening socket for the configured address.
    ///
    /// On Unix the standard library sets `SO_REUSEADDR` on listening sockets,
    /// so a restart does not trip over connections in `TIME_WAIT`.
    pub fn bind(&self) -> Result<TcpListener, SmtpError> {
        let addr = self.shared.config.socket_addr();
        let listener = TcpListener::bind(addr).map_err(|source| SmtpError::Bind { addr, source })?;
        *lock(&self.shared.local_addr) = Some(listener.local_addr()?);

        Ok(listener)
    }

    /// Bind and run the accept loop on the current thread until [`stop`] is
    /// called
    ///
    /// [`stop`]: SmtpServer::stop
    pub fn start(&self) -> Result<(), SmtpError> {
        let listener = self.bind_for_start()?;
        self.serve(listener)
    }

    /// Bind on the current thread, so bind errors reach the caller, then run
    /// the accept loop in the background
    pub fn spawn(&self) -> Result<ServerHandle, SmtpError> {
        let listener = self.bind_for_start()?;
        let local_addr = listener.local_addr()?;

        let server = self.clone();
        let thread = thread::Builder::new()
            .name("smtp-acceptor".to_string())
            .spawn(move || server.serve(listener))?;

        Ok(ServerHandle {
            server: self.clone(),
            local_addr,
            thread,
        })
    }

    /// Run the accept loop on an already bound listener.
    ///
    /// Every accepted connection gets its own session thread; the loop never
    /// waits on a session. Accept errors are logged and the loop carries on.
    pub fn serve(&self, listener: TcpListener) -> Result<(), SmtpError> {
        let addr = listener.local_addr()?;
        *lock(&self.shared.local_addr) = Some(addr);

        internal!(level = INFO, "SMTP server listening on {}", addr);
        self.notify(StatusListener::started);

        if !self.is_stopping() {
            for stream in listener.incoming() {
                if self.is_stopping() {
                    break;
                }

                match stream {
                    Ok(stream) => self.dispatch(stream),
                    Err(e) => internal!(level = WARN, "Error accepting connection: {}", e),
                }
            }
        }

        internal!(level = INFO, "SMTP server on {} stopped", addr);
        self.notify(StatusListener::stopped);

        Ok(())
    }

    /// Stop accepting connections.
    ///
    /// Sessions that are already running are left alone and finish on their
    /// own.
    pub fn stop(&self) {
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            return;
        }

        internal!(level = INFO, "Stopping SMTP server");

        // accept() only notices the flag once it returns, so wake it up
        if let Some(addr) = self.local_addr() {
            let _ = TcpStream::connect_timeout(&wake_address(addr), Duration::from_secs(1));
        }
    }

    fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    fn bind_for_start(&self) -> Result<TcpListener, SmtpError> {
        self.bind().inspect_err(|e| {
            internal!(level = ERROR, "{}", e);
            self.notify(StatusListener::stopped);
        })
    }

    fn notify(&self, event: fn(&StatusListener)) {
        for listener in lock(&self.shared.listeners).iter() {
            event(listener);
        }
    }

    fn dispatch(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        if let Some(max) = self.shared.config.max_connections {
            if self.active_sessions() >= max {
                internal!(
                    level = WARN,
                    "Refusing connection from {}: {} sessions active",
                    peer,
                    max
                );
                refuse(stream, &SmtpError::TooManyConnections { max });
                return;
            }
        }

        let guard = ActiveSession::enter(self.shared.clone());
        let spawned = thread::Builder::new()
            .name(format!("smtp-session-{peer}"))
            .spawn(move || {
                let session = guard;
                internal!(level = INFO, "Connection from {}", peer);
                match handle_client(&session.0, stream) {
                    Ok(()) => internal!(level = INFO, "Connection from {} closed", peer),
                    Err(e) => internal!(level = WARN, "Session with {} ended: {}", peer, e),
                }
            });

        if let Err(e) = spawned {
            internal!(level = ERROR, "Unable to start session thread: {}", e);
        }
    }
}

/// A server running its accept loop on a background thread
pub struct ServerHandle {
    server: SmtpServer,
    local_addr: SocketAddr,
    thread: JoinHandle<Result<(), SmtpError>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn server(&self) -> &SmtpServer {
        &self.server
    }

    /// Stop the accept loop and wait for it to exit
    pub fn stop(self) -> Result<(), SmtpError> {
        self.server.stop();
        self.thread
            .join()
            .map_err(|_| SmtpError::Io(io::Error::other("accept loop panicked")))?
    }
}

/// Counts a live session for the connection limit
struct ActiveSession(Arc<Shared>);

impl ActiveSession {
    fn enter(shared: Arc<Shared>) -> Self {
        shared.active.fetch_add(1, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Outcome of reading one line from the client
enum ReadLine {
    Line(String),
    TooLong,
    Eof,
}

/// Drive one client connection from greeting to close
fn handle_client(shared: &Shared, stream: TcpStream) -> Result<(), SmtpError> {
    stream.set_read_timeout(shared.config.idle_timeout())?;

    let tls_mode = shared.config.tls.as_ref().map(|tls| tls.mode);
    let mut connection = Connection::new(stream);
    if let (Some(TlsMode::Implicit), Some(config)) = (tls_mode, shared.tls.clone()) {
        connection = connection.upgrade(config)?;
    }

    let mut session = SmtpSession::new(
        shared.assembler.clone(),
        SessionOptions {
            hostname: shared.config.hostname.clone(),
            max_message_size: shared.config.max_message_size,
            starttls: shared.tls.is_some() && tls_mode == Some(TlsMode::StartTls),
            secure: connection.is_tls(),
        },
    );

    let mut reader = BufReader::new(connection);
    send_response(reader.get_mut(), &session.greet())?;

    let mut line_buffer = Vec::new();
    loop {
        let result = match read_line(&mut reader, &mut line_buffer) {
            Ok(ReadLine::Eof) => {
                end_session(&mut session);
                return Ok(());
            }
            Ok(ReadLine::TooLong) => {
                incoming!("<line longer than {} bytes>", SmtpLimits::TEXT_LINE_MAX_LENGTH);
                session.reject_line(SmtpError::LineTooLong {
                    max: SmtpLimits::TEXT_LINE_MAX_LENGTH,
                })
            }
            Ok(ReadLine::Line(line)) => {
                incoming!("{}", line);
                if session.state() != SmtpState::InData && line.trim().is_empty() {
                    continue;
                }
                session.process_line(&line)
            }
            Err(e) if is_timeout(&e) => {
                end_session(&mut session);
                let _ = send_response(reader.get_mut(), &SmtpResponse::from(&SmtpError::Timeout));
                reader.get_mut().close();
                return Err(SmtpError::Timeout);
            }
            Err(e) => {
                end_session(&mut session);
                return Err(e.into());
            }
        };

        match result {
            Ok(Action::Collect) => {}
            Ok(Action::Reply(response)) => send_response(reader.get_mut(), &response)?,
            Ok(Action::Close(response)) => {
                send_response(reader.get_mut(), &response)?;
                reader.get_mut().close();
                return Ok(());
            }
            Ok(Action::StartTls(response)) => {
                let config = shared.tls.clone().ok_or(SmtpError::TlsUnavailable)?;
                send_response(reader.get_mut(), &response)?;
                reader = BufReader::new(reader.into_inner().upgrade(config)?);
                session.secure();
            }
            Err(e) => {
                send_response(reader.get_mut(), &SmtpResponse::from(&e))?;
                if e.is_fatal() {
                    reader.get_mut().close();
                    return Err(e);
                }
            }
        }
    }
}

/// Close the session after the connection is lost. Returns whether a message
/// in the middle of DATA was dropped.
fn end_session(session: &mut SmtpSession) -> bool {
    match session.disconnect() {
        Some(e) => {
            internal!(level = WARN, "Connection lost during DATA, message dropped: {}", e);
            true
        }
        None => false,
    }
}

/// Read one line, without its line ending.
///
/// Lines longer than the text line limit are drained and reported as
/// [`ReadLine::TooLong`] so the reader stays in step with the client.
fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<ReadLine> {
    let limit = SmtpLimits::TEXT_LINE_MAX_LENGTH as u64;

    buf.clear();
    let read = reader.by_ref().take(limit).read_until(b'\n', buf)?;
    if read == 0 {
        return Ok(ReadLine::Eof);
    }

    if !buf.ends_with(b"\n") && read as u64 == limit {
        loop {
            buf.clear();
            let read = reader.by_ref().take(limit).read_until(b'\n', buf)?;
            if read == 0 || buf.ends_with(b"\n") {
                return Ok(ReadLine::TooLong);
            }
        }
    }

    let line = buf
        .strip_suffix(b"\n")
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .unwrap_or(buf);

    Ok(ReadLine::Line(String::from_utf8_lossy(line).into_owned()))
}

/// Send a response to the client
fn send_response<W: Write>(stream: &mut W, response: &SmtpResponse) -> Result<(), SmtpError> {
    let formatted = response.format();
    let formatted = if formatted.len() > SmtpLimits::REPLY_LINE_MAX_LENGTH {
        SmtpResponse::new(&response.code, "Response too long (truncated)").format()
    } else {
        formatted
    };

    outgoing!("{}", formatted.trim_end());
    stream.write_all(formatted.as_bytes())?;
    stream.flush()?;
    Ok(())
}

/// Turn a connection away before a session is started
fn refuse(mut stream: TcpStream, err: &SmtpError) {
    let _ = send_response(&mut stream, &SmtpResponse::from(err));
    let _ = stream.shutdown(Shutdown::Both);
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Where to connect to reach a listener bound to `addr`
fn wake_address(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all_lines(input: &[u8]) -> Vec<String> {
        let mut reader = BufReader::new(Cursor::new(input.to_vec()));
        let mut buf = Vec::new();
        let mut lines = Vec::new();
        loop {
            match read_line(&mut reader, &mut buf).unwrap() {
                ReadLine::Line(line) => lines.push(line),
                ReadLine::TooLong => lines.push("<too long>".to_string()),
                ReadLine::Eof => return lines,
            }
        }
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_read_line_endings() {
        assert_eq!(
            read_all_lines(b"HELO a\r\nMAIL FROM:<a@b.c>\n\r\nlast"),
            ["HELO a", "MAIL FROM:<a@b.c>", "", "last"]
        );
    }

    #[test]
    fn test_read_line_too_long() {
        let mut input = vec![b'a'; SmtpLimits::TEXT_LINE_MAX_LENGTH * 2 + 10];
        input.extend_from_slice(b"\r\nnext\r\n");
        assert_eq!(read_all_lines(&input), ["<too long>", "next"]);
    }

    #[test]
    fn test_read_line_at_limit() {
        let mut input = vec![b'a'; SmtpLimits::TEXT_LINE_MAX_LENGTH - 2];
        input.extend_from_slice(b"\r\n");
        let lines = read_all_lines(&input);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), SmtpLimits::TEXT_LINE_MAX_LENGTH - 2);
    }

    #[test]
    fn test_read_line_non_utf8() {
        let lines = read_all_lines(b"\xFF\xFE HELO client.local\r\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("HELO client.local"));
    }

    #[test]
    fn test_end_session_reports_dropped_message() {
        let inbox = Inbox::new();
        let mut session = SmtpSession::new(
            EmailAssembler::new(inbox.clone()),
            SessionOptions::default(),
        );
        session.greet();
        assert!(!end_session(&mut session));

        let mut session = SmtpSession::new(
            EmailAssembler::new(inbox.clone()),
            SessionOptions::default(),
        );
        session.greet();
        for line in ["MAIL FROM:<a@example.com>", "RCPT TO:<b@example.com>", "DATA", "partial"] {
            session.process_line(line).unwrap();
        }

        assert!(end_session(&mut session));
        assert_eq!(session.state(), SmtpState::Closed);
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_send_response() {
        let mut out = Vec::new();
        send_response(&mut out, &SmtpResponse::ok()).unwrap();
        assert_eq!(out, b"250 OK\r\n");
    }

    #[test]
    fn test_wake_address() {
        assert_eq!(
            wake_address("0.0.0.0:2525".parse().unwrap()),
            "127.0.0.1:2525".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            wake_address("[::]:25".parse().unwrap()),
            "[::1]:25".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            wake_address("10.0.0.1:25".parse().unwrap()),
            "10.0.0.1:25".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_server_creation() {
        let server = SmtpServer::new(test_config()).unwrap();
        assert_eq!(server.config().port, 0);
        assert!(server.local_addr().is_none());
        assert!(server.latest_message().is_none());
        assert!(server.latest_subject().is_none());
    }

    #[test]
    fn test_spawn_and_stop() {
        let server = SmtpServer::new(test_config()).unwrap();
        let handle = server.spawn().unwrap();

        assert_ne!(handle.local_addr().port(), 0);
        assert_eq!(server.local_addr(), Some(handle.local_addr()));

        handle.stop().unwrap();
    }

    #[test]
    fn test_stop_before_serve() {
        let server = SmtpServer::new(test_config()).unwrap();
        let listener = server.bind().unwrap();
        server.stop();
        server.serve(listener).unwrap();
    }
}
