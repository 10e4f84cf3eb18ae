//! TLS setup for the listener

use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use rustls::{
    ServerConfig, SupportedProtocolVersion,
    crypto::ring,
    pki_types::{CertificateDer, PrivateKeyDer},
};

use crate::config::{ConfigError, TlsConfig};
use crate::smtp::error::SmtpError;

/// Protocol names accepted in [`TlsConfig::protocols`] and the versions they
/// enable
pub static SUPPORTED_PROTOCOLS: &[(&str, &SupportedProtocolVersion)] = &[
    ("TLSv1.2", &rustls::version::TLS12),
    ("TLSv1.3", &rustls::version::TLS13),
];

/// Resolve protocol names to the versions rustls may negotiate.
///
/// An empty list enables everything the library supports. This is the
/// permissive fallback and is announced with a warning every time it is
/// taken.
pub fn protocol_versions(
    names: &[String],
) -> Result<Vec<&'static SupportedProtocolVersion>, SmtpError> {
    if names.is_empty() {
        crate::internal!(
            level = WARN,
            "No TLS protocol versions configured, every version supported by the TLS library \
             may be negotiated"
        );
        return Ok(rustls::ALL_VERSIONS.to_vec());
    }

    let mut versions = Vec::with_capacity(names.len());
    for name in names {
        let version = SUPPORTED_PROTOCOLS
            .iter()
            .find(|(known, _)| *known == name.as_str())
            .map(|(_, version)| *version)
            .ok_or_else(|| SmtpError::UnsupportedProtocol(name.clone()))?;
        if !versions
            .iter()
            .any(|known: &&SupportedProtocolVersion| known.version == version.version)
        {
            versions.push(version);
        }
    }

    Ok(versions)
}

/// Build the rustls server configuration for `tls`
pub fn server_config(tls: &TlsConfig) -> Result<Arc<ServerConfig>, SmtpError> {
    let versions = protocol_versions(&tls.protocols)?;
    let certs = load_certs(&tls.certificate)?;
    let key = load_key(&tls.key)?;

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_protocol_versions(&versions)?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    crate::internal!(
        level = DEBUG,
        "TLS configured with protocols {:?}",
        versions.iter().map(|v| v.version).collect::<Vec<_>>()
    );

    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let certificate_error = |reason: String| ConfigError::Certificate {
        what: "certificate",
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| certificate_error(e.to_string()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| certificate_error(e.to_string()))?;

    if certs.is_empty() {
        return Err(certificate_error("no certificates found".to_string()));
    }

    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let key_error = |reason: String| ConfigError::Certificate {
        what: "private key",
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| key_error(e.to_string()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| key_error(e.to_string()))?
        .ok_or_else(|| key_error("no private key found".to_string()))
}
