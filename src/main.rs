use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use pigeonhole::{ServerConfig, SmtpServer, StatusListener, TlsConfig, TlsMode, logging};

/// Capture mail sent over SMTP and keep it in memory
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Name announced to clients
    #[arg(long)]
    hostname: Option<String>,

    /// PEM certificate chain; enables TLS together with --tls-key
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    #[arg(long, value_enum)]
    tls_mode: Option<Mode>,

    /// TLS protocol to enable (TLSv1.2, TLSv1.3); may be repeated
    #[arg(long = "tls-protocol", conflicts_with = "all_tls_protocols")]
    tls_protocols: Vec<String>,

    /// Allow every protocol version the TLS library supports
    #[arg(long)]
    all_tls_protocols: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    Implicit,
    Starttls,
}

impl From<Mode> for TlsMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Implicit => TlsMode::Implicit,
            Mode::Starttls => TlsMode::StartTls,
        }
    }
}

impl Cli {
    fn into_config(self) -> Result<ServerConfig, pigeonhole::ConfigError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(hostname) = self.hostname {
            config.hostname = hostname;
        }
        if let (Some(certificate), Some(key)) = (self.tls_cert, self.tls_key) {
            config.tls = Some(TlsConfig {
                certificate,
                key,
                mode: TlsMode::default(),
                protocols: Vec::new(),
            });
        }

        if let Some(tls) = config.tls.as_mut() {
            if let Some(mode) = self.tls_mode {
                tls.mode = mode.into();
            }
            if !self.tls_protocols.is_empty() {
                tls.protocols = self.tls_protocols;
            } else if self.all_tls_protocols {
                tls.protocols.clear();
            } else if tls.protocols.is_empty() {
                tls.protocols = vec!["TLSv1.2".to_string()];
            }
        }

        Ok(config)
    }
}

fn main() -> ExitCode {
    logging::init();

    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let address = config.socket_addr();
    let server = match SmtpServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to configure server: {e}");
            return ExitCode::FAILURE;
        }
    };

    server.add_status_listener(StatusListener::new(
        move || tracing::info!("Accepting mail on {address}"),
        || tracing::info!("No longer accepting mail"),
    ));

    if let Err(e) = server.start() {
        tracing::error!("Failed to start server: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_restrict_tls() {
        let cli = Cli::parse_from(["pigeonhole", "--tls-cert", "c.pem", "--tls-key", "k.pem"]);
        let config = cli.into_config().unwrap();
        let tls = config.tls.unwrap();
        assert_eq!(tls.protocols, ["TLSv1.2"]);
        assert_eq!(tls.mode, TlsMode::StartTls);
    }

    #[test]
    fn test_cli_all_protocols() {
        let cli = Cli::parse_from([
            "pigeonhole",
            "--tls-cert",
            "c.pem",
            "--tls-key",
            "k.pem",
            "--all-tls-protocols",
            "--tls-mode",
            "implicit",
        ]);
        let tls = cli.into_config().unwrap().tls.unwrap();
        assert!(tls.protocols.is_empty());
        assert_eq!(tls.mode, TlsMode::Implicit);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "pigeonhole",
            "--port",
            "2600",
            "--bind",
            "127.0.0.1",
            "--hostname",
            "mx.test",
        ]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.port, 2600);
        assert_eq!(config.bind_address.to_string(), "127.0.0.1");
        assert_eq!(config.hostname, "mx.test");
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_cli_tls_needs_both_files() {
        assert!(Cli::try_parse_from(["pigeonhole", "--tls-cert", "c.pem"]).is_err());
    }
}
