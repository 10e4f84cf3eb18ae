//! TLS sessions: implicit TLS, STARTTLS and protocol restrictions

mod support;

use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pigeonhole::{ServerConfig, SmtpError, SmtpServer, TlsConfig, TlsMode};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme, StreamOwned,
    SupportedProtocolVersion,
};
use support::{Client, connect, start_server_with, test_config};
use tempfile::TempDir;

/// Accepts any certificate; the tests talk to their own self-signed server
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

struct Certificate {
    _dir: TempDir,
    cert: PathBuf,
    key: PathBuf,
}

fn self_signed() -> Certificate {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("key.pem");
    std::fs::write(&cert, certified.cert.pem()).unwrap();
    std::fs::write(&key, certified.signing_key.serialize_pem()).unwrap();

    Certificate {
        _dir: dir,
        cert,
        key,
    }
}

fn tls_config(certificate: &Certificate, mode: TlsMode, protocols: &[&str]) -> ServerConfig {
    ServerConfig {
        tls: Some(TlsConfig {
            certificate: certificate.cert.clone(),
            key: certificate.key.clone(),
            mode,
            protocols: protocols.iter().map(|p| p.to_string()).collect(),
        }),
        ..test_config()
    }
}

fn tls_client(
    stream: TcpStream,
    versions: &[&'static SupportedProtocolVersion],
) -> Client<StreamOwned<ClientConnection, TcpStream>> {
    let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_protocol_versions(versions)
        .unwrap()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth();

    let connection =
        ClientConnection::new(Arc::new(config), ServerName::try_from("localhost").unwrap())
            .unwrap();
    Client::new(StreamOwned::new(connection, stream))
}

fn tls_connect(
    addr: std::net::SocketAddr,
    versions: &[&'static SupportedProtocolVersion],
) -> Client<StreamOwned<ClientConnection, TcpStream>> {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    tls_client(stream, versions)
}

#[test]
fn test_implicit_tls_delivery() {
    let certificate = self_signed();
    let (server, handle) =
        start_server_with(tls_config(&certificate, TlsMode::Implicit, &["TLSv1.3"]));

    let mut client = tls_connect(handle.local_addr(), &[&rustls::version::TLS13]);
    assert!(client.read_reply().unwrap().starts_with("220"));

    let ehlo = client.command("EHLO client.local").unwrap();
    assert!(!ehlo.contains("STARTTLS"));

    let reply = client
        .send_message("a@example.com", "b@example.com", &["over tls"])
        .unwrap();
    assert!(reply.starts_with("250"), "{reply}");
    assert_eq!(server.latest_message().as_deref(), Some("over tls"));

    client.command("QUIT").unwrap();
    handle.stop().unwrap();
}

#[test]
fn test_starttls_upgrade() {
    let certificate = self_signed();
    let (server, handle) =
        start_server_with(tls_config(&certificate, TlsMode::StartTls, &["TLSv1.2"]));

    let mut client = connect(handle.local_addr());
    client.read_reply().unwrap();

    let ehlo = client.command("EHLO client.local").unwrap();
    assert!(ehlo.contains("STARTTLS"), "{ehlo}");

    client.command("MAIL FROM:<dropped@example.com>").unwrap();
    assert!(client.command("STARTTLS").unwrap().starts_with("220"));

    let mut client = tls_client(client.into_inner(), &[&rustls::version::TLS12]);

    // Nothing from before the handshake survives it
    assert!(
        client
            .command("RCPT TO:<b@example.com>")
            .unwrap()
            .starts_with("503")
    );

    let ehlo = client.command("EHLO client.local").unwrap();
    assert!(!ehlo.contains("STARTTLS"), "{ehlo}");
    assert!(client.command("STARTTLS").unwrap().starts_with("503"));

    let reply = client
        .send_message("a@example.com", "b@example.com", &["secured"])
        .unwrap();
    assert!(reply.starts_with("250"), "{reply}");

    let message = server.inbox().newest().unwrap();
    assert_eq!(message.from(), "a@example.com");
    assert_eq!(message.body(), "secured");

    handle.stop().unwrap();
}

#[test]
fn test_disabled_protocol_is_refused() {
    let certificate = self_signed();
    let (server, handle) =
        start_server_with(tls_config(&certificate, TlsMode::Implicit, &["TLSv1.3"]));

    let mut client = tls_connect(handle.local_addr(), &[&rustls::version::TLS12]);
    assert!(client.read_reply().is_err());
    assert!(server.inbox().is_empty());

    // The listener keeps serving other clients
    let mut client = tls_connect(handle.local_addr(), &[&rustls::version::TLS13]);
    assert!(client.read_reply().unwrap().starts_with("220"));

    handle.stop().unwrap();
}

#[test]
fn test_empty_protocol_list_allows_all_versions() {
    let certificate = self_signed();
    let (_server, handle) = start_server_with(tls_config(&certificate, TlsMode::Implicit, &[]));

    for version in [&rustls::version::TLS12, &rustls::version::TLS13] {
        let mut client = tls_connect(handle.local_addr(), &[version]);
        assert!(client.read_reply().unwrap().starts_with("220"));
        client.command("QUIT").unwrap();
    }

    handle.stop().unwrap();
}

#[test]
fn test_unknown_protocol_name() {
    let certificate = self_signed();
    let config = tls_config(&certificate, TlsMode::StartTls, &["TLSv1.2", "SSLv3"]);

    assert!(matches!(
        SmtpServer::new(config),
        Err(SmtpError::UnsupportedProtocol(name)) if name == "SSLv3"
    ));
}

#[test]
fn test_missing_key_file() {
    let certificate = self_signed();
    let mut config = tls_config(&certificate, TlsMode::StartTls, &["TLSv1.2"]);
    if let Some(tls) = config.tls.as_mut() {
        tls.key = certificate.cert.with_file_name("missing.pem");
    }

    assert!(matches!(
        SmtpServer::new(config),
        Err(SmtpError::Config(_))
    ));
}
