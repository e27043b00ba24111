//! Session state for an authenticated tunnel
//!
//! Network parameters arrive in Config frames and are merged field by field:
//! a field absent from an update leaves the stored value alone.

use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Payload of a Config frame. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_servers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_ip: Option<String>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.routes.is_none() && self.dns_servers.is_none() && self.interface_ip.is_none()
    }
}

/// Snapshot of the parameters the host network should reflect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkParameters {
    pub routes: Vec<String>,
    pub dns_servers: Vec<String>,
    pub interface_address: Option<String>,
}

/// Session state tracked across the lifetime of one logical tunnel
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    routes: Vec<String>,
    dns_servers: Vec<String>,
    interface_address: Option<String>,
    connected: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a Config frame payload into the session
    pub fn apply_config(&mut self, update: &ConfigUpdate) {
        if update.is_empty() {
            debug!("Config update carried no recognised fields");
            return;
        }

        if let Some(routes) = &update.routes {
            self.routes = routes.clone();
            info!("Session routes updated: {routes:?}");
        }
        if let Some(dns) = &update.dns_servers {
            self.dns_servers = dns.clone();
            info!("Session DNS servers updated: {dns:?}");
        }
        if let Some(ip) = &update.interface_ip {
            self.interface_address = Some(ip.clone());
            info!("Session interface address updated: {ip}");
        }
    }

    pub fn mark_connected(&mut self) {
        self.connected = true;
    }

    pub fn mark_disconnected(&mut self) {
        self.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn routes(&self) -> &[String] {
        &self.routes
    }

    pub fn dns_servers(&self) -> &[String] {
        &self.dns_servers
    }

    pub fn interface_address(&self) -> Option<&str> {
        self.interface_address.as_deref()
    }

    /// Current parameters as a comparable snapshot
    pub fn parameters(&self) -> NetworkParameters {
        NetworkParameters {
            routes: self.routes.clone(),
            dns_servers: self.dns_servers.clone(),
            interface_address: self.interface_address.clone(),
        }
    }

    /// Forget everything; used when the tunnel is torn down
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(json: &str) -> ConfigUpdate {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let mut session = SessionState::new();
        session.apply_config(&update(
            r#"{"routes":["10.0.0.0/8"],"dns_servers":["10.0.0.1"],"interface_ip":"10.8.0.2/24"}"#,
        ));
        session.apply_config(&update(r#"{"dns_servers":["1.1.1.1"]}"#));

        assert_eq!(session.routes(), ["10.0.0.0/8"]);
        assert_eq!(session.dns_servers(), ["1.1.1.1"]);
        assert_eq!(session.interface_address(), Some("10.8.0.2/24"));
    }

    #[test]
    fn test_disjoint_updates_commute() {
        let a = update(r#"{"routes":["192.168.0.0/16"]}"#);
        let b = update(r#"{"interface_ip":"10.1.1.5"}"#);

        let mut first = SessionState::new();
        first.apply_config(&a);
        first.apply_config(&b);

        let mut second = SessionState::new();
        second.apply_config(&b);
        second.apply_config(&a);

        assert_eq!(first.parameters(), second.parameters());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let mut session = SessionState::new();
        session.apply_config(&update(r#"{"banner":"welcome","mtu":1400}"#));
        assert_eq!(session.parameters(), NetworkParameters::default());
    }

    #[test]
    fn test_empty_list_replaces_previous() {
        let mut session = SessionState::new();
        session.apply_config(&update(r#"{"routes":["10.0.0.0/8"]}"#));
        session.apply_config(&update(r#"{"routes":[]}"#));
        assert!(session.routes().is_empty());
    }

    #[test]
    fn test_reset_clears_connection_and_parameters() {
        let mut session = SessionState::new();
        session.apply_config(&update(r#"{"interface_ip":"10.0.0.2"}"#));
        session.mark_connected();
        assert!(session.is_connected());

        session.reset();
        assert!(!session.is_connected());
        assert!(session.interface_address().is_none());
    }
}
