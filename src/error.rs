//! Error types and fault classification for the SSL-VPN client

use std::io::ErrorKind;
use thiserror::Error;

/// Main error type for VPN operations
#[derive(Error, Debug)]
pub enum VpnError {
    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Host network mutation failures (addresses, routes, resolver)
    #[error("Network configuration error: {0}")]
    Configuration(String),

    /// Frame header or payload could not be understood
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Not enough bytes are buffered to decode a whole frame
    #[error("Incomplete frame: need {needed} bytes, have {available}")]
    IncompleteFrame { needed: usize, available: usize },

    /// Frame could not be encoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Secure transport setup failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Gateway answered the auth frame with a failure status
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// Protocol sequencing errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Peer closed the transport on a frame boundary
    #[error("Transport closed by peer")]
    TransportClosed,

    /// TUN interface errors
    #[error("TUN/TAP error: {0}")]
    TunTap(String),

    /// TLS errors
    #[error("TLS error: {0}")]
    Tls(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Shutdown was requested while the operation was pending
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Invalid state errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Retry limit errors
    #[error("Retry limit exceeded: {0}")]
    RetryLimitExceeded(String),

    /// Permission/privilege errors
    #[error("Permission error: {0}")]
    Permission(String),

    /// Other errors
    #[error("Other error: {0}")]
    Other(String),
}

/// How the orchestrator reacts to a fault raised while relaying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Connection reset, broken pipe, short read: eligible for reconnect
    Recoverable,
    /// Anything else: tear the tunnel down
    Unrecoverable,
}

impl VpnError {
    /// Classify this error for the reconnect policy
    pub fn classify(&self) -> FaultClass {
        match self {
            VpnError::IncompleteFrame { .. } | VpnError::TransportClosed => FaultClass::Recoverable,
            VpnError::Io(err) => match err.kind() {
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof => FaultClass::Recoverable,
                _ => FaultClass::Unrecoverable,
            },
            _ => FaultClass::Unrecoverable,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.classify() == FaultClass::Recoverable
    }
}

/// Result type alias for VPN operations
pub type Result<T> = std::result::Result<T, VpnError>;

/// Helper trait for converting errors to VpnError
pub trait IntoVpnError<T> {
    fn into_vpn_error(self, context: &str) -> Result<T>;
}

impl<T, E> IntoVpnError<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn into_vpn_error(self, context: &str) -> Result<T> {
        self.map_err(|e| VpnError::Other(format!("{context}: {e}")))
    }
}

impl From<toml::de::Error> for VpnError {
    fn from(err: toml::de::Error) -> Self {
        VpnError::Config(format!("TOML parsing error: {err}"))
    }
}

impl From<rustls::Error> for VpnError {
    fn from(err: rustls::Error) -> Self {
        VpnError::Tls(format!("TLS error: {err}"))
    }
}

impl From<serde_json::Error> for VpnError {
    fn from(err: serde_json::Error) -> Self {
        VpnError::Protocol(format!("JSON payload error: {err}"))
    }
}
