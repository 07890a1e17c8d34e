//! Transport and login for a single IMAP session
//!
//! Opens plain TCP or implicit TLS (IMAPS), then logs in. TCP and TLS
//! are bounded by `Timeouts::connect`, LOGIN by `Timeouts::auth`.
//! Whatever is dropped on a timeout takes its socket with it.

use crate::config::{SessionConfig, Timeouts};
use crate::error::{Error, Result};
use async_imap::Session;
use rustls::pki_types::ServerName;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info};

/// An authenticated IMAP session over either transport.
pub type ImapSession = Session<Compat<ImapStream>>;

/// The byte stream under an IMAP session.
pub enum ImapStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl fmt::Debug for ImapStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("ImapStream::Plain"),
            Self::Tls(_) => f.write_str("ImapStream::Tls"),
        }
    }
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Build a TLS connector.
///
/// Verifies against the bundled web PKI roots unless `insecure` is
/// set, in which case any certificate is accepted.
fn tls_connector(insecure: bool) -> Result<TlsConnector> {
    let builder = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::Tls(format!("Unsupported TLS configuration: {e}")))?;

    let config = if insecure {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Open the transport: TCP, then the TLS handshake when enabled.
async fn open_stream(config: &SessionConfig) -> Result<ImapStream> {
    let addr = format!("{}:{}", config.host, config.port);
    debug!("Connecting to IMAP server at {}", addr);

    let tcp_stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| Error::Connection(format!("TCP connect to {addr} failed: {e}")))?;

    if !config.use_tls {
        return Ok(ImapStream::Plain(tcp_stream));
    }

    let connector = tls_connector(config.tls_insecure)?;
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;

    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| Error::Connection(format!("TLS handshake with {} failed: {e}", config.host)))?;

    Ok(ImapStream::Tls(Box::new(tls_stream)))
}

/// Log in over an open transport, bounded by `auth`.
async fn login(
    stream: ImapStream,
    config: &SessionConfig,
    auth: time::Duration,
) -> Result<ImapSession> {
    let client = async_imap::Client::new(stream.compat());

    let login = client.login(&config.user, &config.password);
    let session = time::timeout(auth, login)
        .await
        .map_err(|_| {
            debug!("Auth deadline elapsed, dropping connection");
            Error::Connection(format!("Authentication timed out after {}ms", auth.as_millis()))
        })?
        .map_err(|(e, _)| Error::Connection(format!("Login failed: {e}")))?;

    info!("Connected to IMAP server");
    Ok(session)
}

/// Open the transport within `timeouts.connect`, then log in within
/// `timeouts.auth`.
///
/// # Errors
///
/// Returns [`Error::Connection`] when the TCP connect, TLS handshake or
/// LOGIN fails, or when the connect or auth deadline elapses.
pub async fn connect(config: &SessionConfig, timeouts: &Timeouts) -> Result<ImapSession> {
    let stream = time::timeout(timeouts.connect, open_stream(config))
        .await
        .map_err(|_| {
            debug!("Connect deadline elapsed, dropping partial connection");
            Error::Connection(format!(
                "Connection timed out after {}ms",
                timeouts.connect.as_millis()
            ))
        })??;

    login(stream, config, timeouts.auth).await
}

/// Certificate verifier that accepts all certificates
/// (for self-signed IMAP servers).
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
