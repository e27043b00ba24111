//! Authentication handling for the tunnel protocol
//!
//! Builds the transport policy for the secure stream and the single auth
//! frame sent once the handshake completes.

use crate::error::Result;
use crate::protocol::frame::{Frame, FrameType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Username/password pair sent to the gateway
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Protocol versions offered during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    Tls13,
    Tls12,
}

/// Parameters for setting up the secure transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportPolicy {
    /// Offered versions, most preferred first
    pub versions: Vec<TlsVersion>,
    /// Whether the peer certificate chain and hostname are checked
    pub verify_certificate: bool,
}

impl TransportPolicy {
    pub fn is_insecure(&self) -> bool {
        !self.verify_certificate
    }
}

/// Build the transport policy. TLS 1.3 and 1.2 are always offered; verification
/// is disabled only when certificate errors are explicitly ignored.
pub fn build_transport_policy(ignore_cert_errors: bool) -> TransportPolicy {
    if ignore_cert_errors {
        log::warn!("Certificate verification is disabled; the gateway identity is not checked");
    }

    TransportPolicy {
        versions: vec![TlsVersion::Tls13, TlsVersion::Tls12],
        verify_certificate: !ignore_cert_errors,
    }
}

/// Build the auth frame: `{"username": ..., "password": ...}`
pub fn build_auth_frame(username: &str, password: &str) -> Result<Frame> {
    #[derive(Serialize)]
    struct AuthPayload<'a> {
        username: &'a str,
        password: &'a str,
    }

    Frame::json(FrameType::Auth, &AuthPayload { username, password })
}

/// Control message exchanged in Control frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ControlMessage {
    pub const SUCCESS: &'static str = "success";

    pub fn success() -> Self {
        Self {
            status: Self::SUCCESS.to_string(),
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: "failure".to_string(),
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Self::SUCCESS
    }
}

/// Holds credentials and produces the artifacts for one connection attempt
#[derive(Debug, Clone)]
pub struct AuthNegotiator {
    credentials: Credentials,
    policy: TransportPolicy,
}

impl AuthNegotiator {
    pub fn new(credentials: Credentials, ignore_cert_errors: bool) -> Self {
        Self {
            credentials,
            policy: build_transport_policy(ignore_cert_errors),
        }
    }

    pub fn transport_policy(&self) -> &TransportPolicy {
        &self.policy
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    /// Auth frame for the stored credentials
    pub fn auth_frame(&self) -> Result<Frame> {
        build_auth_frame(&self.credentials.username, &self.credentials.password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults_to_verification() {
        let policy = build_transport_policy(false);
        assert_eq!(policy.versions, vec![TlsVersion::Tls13, TlsVersion::Tls12]);
        assert!(policy.verify_certificate);
        assert!(!policy.is_insecure());

        let insecure = build_transport_policy(true);
        assert!(insecure.is_insecure());
        assert_eq!(insecure.versions.len(), 2);
    }

    #[test]
    fn test_auth_frame_payload() {
        let frame = build_auth_frame("alice", "p\"ss").unwrap();
        assert_eq!(frame.frame_type, FrameType::Auth);
        let value: serde_json::Value = frame.parse_json().unwrap();
        assert_eq!(value["username"], "alice");
        assert_eq!(value["password"], "p\"ss");
        assert_eq!(value.as_object().map(|o| o.len()), Some(2));
    }

    #[test]
    fn test_control_message_parsing() {
        let ok: ControlMessage = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert!(ok.is_success());
        assert!(ok.message.is_none());

        let rejected: ControlMessage =
            serde_json::from_str(r#"{"status":"failure","message":"bad credentials"}"#).unwrap();
        assert!(!rejected.is_success());
        assert_eq!(rejected.message.as_deref(), Some("bad credentials"));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("bob", "hunter2");
        let printed = format!("{creds:?}");
        assert!(printed.contains("bob"));
        assert!(!printed.contains("hunter2"));

        let negotiator = AuthNegotiator::new(creds, false);
        assert_eq!(negotiator.username(), "bob");
        assert_eq!(negotiator.auth_frame().unwrap().frame_type, FrameType::Auth);
    }
}
