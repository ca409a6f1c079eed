//! Network transport abstraction
//!
//! The engine never opens sockets directly: it asks a [`Transport`] for a
//! full-duplex byte stream. The default [`TcpTransport`] handles TCP with
//! optional TLS; tests substitute their own implementation to drive the
//! protocol state machine against scripted peers.

use crate::config::ProviderConfig;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

/// TCP connection timeout in seconds
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Receive buffer for download connections (4MB)
const RECV_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Send buffer for command traffic (1MB)
const SEND_BUFFER_SIZE: usize = 1024 * 1024;

/// Full-duplex byte stream handed out by a [`Transport`]
///
/// Framing is the caller's responsibility; bytes are delivered as received.
pub trait TransportStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> TransportStream for T {}

/// Capability contract over byte-stream sockets
///
/// Implementations must honor the `tls` flag: if TLS is requested and the
/// implementation cannot provide it, `connect` must fail rather than hand
/// back a plaintext stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a stream to `host:port`, optionally TLS-wrapped
    async fn connect(&self, provider: &ProviderConfig) -> Result<Box<dyn TransportStream>>;
}

/// Certificate verifier that accepts any certificate
///
/// Usenet servers routinely present self-signed or mismatched certificates;
/// providers opt out via `allow_insecure_tls = false`, which validates
/// against the Mozilla root store instead.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

/// Default transport: TCP with optional rustls TLS
#[derive(Debug, Default)]
pub struct TcpTransport;

impl TcpTransport {
    /// Create the default transport
    pub fn new() -> Self {
        Self
    }

    async fn open_tcp(&self, provider: &ProviderConfig) -> Result<TcpStream> {
        use std::net::ToSocketAddrs;

        let addr = format!("{}:{}", provider.host, provider.port);
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| EngineError::ConnectionFailed(format!("resolve {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| EngineError::ConnectionFailed(format!("no address for {}", addr)))?;

        use socket2::{Domain, Protocol, Socket, Type};
        let domain = if socket_addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

        // Low latency for the command/response pattern, large buffers for
        // article throughput
        socket.set_nodelay(true)?;
        if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
            warn!("Failed to set receive buffer size: {}", e);
        }
        if let Err(e) = socket.set_send_buffer_size(SEND_BUFFER_SIZE) {
            warn!("Failed to set send buffer size: {}", e);
        }

        // socket2 connect is blocking; run it on the blocking pool and only
        // flip to non-blocking once connected
        let tcp_stream = timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            tokio::task::spawn_blocking(move || -> std::io::Result<std::net::TcpStream> {
                socket.connect(&socket_addr.into())?;
                socket.set_nonblocking(true)?;
                Ok(socket.into())
            }),
        )
        .await
        .map_err(|_| EngineError::Timeout)?
        .map_err(|e| EngineError::Io(std::io::Error::other(format!("task join error: {}", e))))??;

        Ok(TcpStream::from_std(tcp_stream)?)
    }

    fn tls_config(provider: &ProviderConfig) -> ClientConfig {
        use tokio_rustls::rustls::crypto::{CryptoProvider, ring};
        let _ = CryptoProvider::install_default(ring::default_provider());

        if provider.allow_insecure_tls {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
                .with_no_client_auth()
        } else {
            let mut root_store = RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, provider: &ProviderConfig) -> Result<Box<dyn TransportStream>> {
        debug!(
            "Connecting to {}:{} (tls={})",
            provider.host, provider.port, provider.tls
        );

        let tcp_stream = self.open_tcp(provider).await?;

        if !provider.tls {
            return Ok(Box::new(tcp_stream));
        }

        let connector = TlsConnector::from(Arc::new(Self::tls_config(provider)));
        let server_name = ServerName::try_from(provider.host.as_str())
            .map_err(|e| EngineError::Tls(format!("invalid server name: {}", e)))?
            .to_owned();

        let tls_stream = timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            connector.connect(server_name, tcp_stream),
        )
        .await
        .map_err(|_| EngineError::Timeout)?
        .map_err(|e| EngineError::Tls(format!("TLS handshake failed: {}", e)))?;

        Ok(Box::new(tls_stream))
    }
}
