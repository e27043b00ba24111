//! Secure transport capability: raw connection plus TLS handshake

use crate::crypto::tls::TlsConfig;
use crate::error::{Result, VpnError};
use crate::protocol::auth::TransportPolicy;
use log::{debug, info};
use rustls::pki_types::ServerName;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Opens a raw connection to the gateway and upgrades it to a secure stream
#[allow(async_fn_in_trait)]
pub trait SecureTransport {
    type Raw;
    type Stream: AsyncRead + AsyncWrite + Unpin;

    /// Connect to `host:port`
    async fn open(&self, host: &str, port: u16) -> Result<Self::Raw>;

    /// Run the handshake on `raw` under `policy`
    async fn handshake(
        &self,
        raw: Self::Raw,
        host: &str,
        policy: &TransportPolicy,
    ) -> Result<Self::Stream>;
}

/// TCP + rustls transport
#[derive(Debug, Clone, Default)]
pub struct TlsTransport {
    ca_file: Option<PathBuf>,
}

impl TlsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust an extra PEM bundle when verifying the gateway
    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }
}

impl SecureTransport for TlsTransport {
    type Raw = TcpStream;
    type Stream = TlsStream<TcpStream>;

    async fn open(&self, host: &str, port: u16) -> Result<TcpStream> {
        debug!("Opening TCP connection to {host}:{port}");
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn handshake(
        &self,
        raw: TcpStream,
        host: &str,
        policy: &TransportPolicy,
    ) -> Result<TlsStream<TcpStream>> {
        let config = TlsConfig::from_policy(policy, self.ca_file.as_deref())?;
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|e| VpnError::Handshake(format!("Invalid server name {host}: {e}")))?;

        let stream = TlsConnector::from(config.client_config())
            .connect(server_name, raw)
            .await
            .map_err(|e| VpnError::Handshake(format!("TLS handshake with {host} failed: {e}")))?;

        let (_, connection) = stream.get_ref();
        info!(
            "TLS established with {host} ({:?})",
            connection.protocol_version()
        );
        Ok(stream)
    }
}
