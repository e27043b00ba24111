//! Tunnel lifecycle states and the observer notified of them

use crate::error::{FaultClass, VpnError};
use crate::protocol::session::SessionState;
use log::{debug, info, warn};
use std::fmt;

/// Lifecycle of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelState {
    Disconnected,
    Connecting,
    Handshaking,
    Authenticating,
    ConfiguringSession,
    Connected,
    Relaying,
    Reconnecting,
}

impl TunnelState {
    /// True while a transport is being set up or is in use
    pub fn is_active(&self) -> bool {
        !matches!(self, TunnelState::Disconnected)
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TunnelState::Disconnected => "disconnected",
            TunnelState::Connecting => "connecting",
            TunnelState::Handshaking => "handshaking",
            TunnelState::Authenticating => "authenticating",
            TunnelState::ConfiguringSession => "configuring session",
            TunnelState::Connected => "connected",
            TunnelState::Relaying => "relaying",
            TunnelState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Receives tunnel lifecycle events. Injected into the orchestrator in place of
/// any global logger configuration.
pub trait SessionObserver: Send + Sync {
    fn state_changed(&self, from: TunnelState, to: TunnelState);

    fn session_updated(&self, _session: &SessionState) {}

    fn fault(&self, _error: &VpnError, _class: FaultClass) {}
}

/// Observer that forwards events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl SessionObserver for LogObserver {
    fn state_changed(&self, from: TunnelState, to: TunnelState) {
        info!("Tunnel state: {from} -> {to}");
    }

    fn session_updated(&self, session: &SessionState) {
        debug!(
            "Session parameters: address={:?} routes={:?} dns={:?}",
            session.interface_address(),
            session.routes(),
            session.dns_servers()
        );
    }

    fn fault(&self, error: &VpnError, class: FaultClass) {
        warn!("Tunnel fault ({class:?}): {error}");
    }
}
