//! Host network configuration
//!
//! Applies the routes, resolver entries and interface address the gateway hands
//! out, and records every mutation so teardown can undo exactly what was done.

use crate::error::{Result, VpnError};
use ipnet::IpNet;
use log::{debug, error, info, warn};
use std::net::IpAddr;

pub mod system;

pub use system::SystemNetwork;

/// Privileged host operations. `SystemNetwork` shells out to `ip`;
/// tests substitute an in-memory recorder.
pub trait HostNetwork: Send {
    /// Assign `address` to `interface`
    fn assign_address(&mut self, address: &str, interface: &str) -> Result<()>;

    /// Remove an address previously assigned with `assign_address`
    fn remove_address(&mut self, address: &str, interface: &str) -> Result<()>;

    /// Add a route for `destination` via `interface`
    fn add_route(&mut self, destination: &str, interface: &str) -> Result<()>;

    /// Remove a route previously added with `add_route`
    fn delete_route(&mut self, destination: &str, interface: &str) -> Result<()>;

    /// Current resolver configuration
    fn read_resolver(&mut self) -> Result<String>;

    /// Replace the resolver configuration
    fn write_resolver(&mut self, contents: &str) -> Result<()>;
}

/// A route this client added and must remove on teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub destination: String,
    pub interface: String,
}

/// Header written above the gateway's nameservers
pub const RESOLVER_HEADER: &str = "# Generated by rsslvpn; original restored on disconnect";

/// Tracks and reverts host network changes
pub struct NetworkConfigurator {
    host: Box<dyn HostNetwork>,
    added_routes: Vec<RouteRecord>,
    resolver_backup: Option<String>,
}

impl NetworkConfigurator {
    pub fn new(host: Box<dyn HostNetwork>) -> Self {
        Self {
            host,
            added_routes: Vec::new(),
            resolver_backup: None,
        }
    }

    /// Save the current resolver configuration. Only the first call per
    /// tunnel takes effect, so a reconnect never backs up our own file.
    pub fn backup_resolver(&mut self) {
        if self.resolver_backup.is_some() {
            debug!("Resolver backup already held");
            return;
        }

        match self.host.read_resolver() {
            Ok(contents) => {
                debug!("Backed up resolver configuration ({} bytes)", contents.len());
                self.resolver_backup = Some(contents);
            }
            Err(e) => warn!("Could not back up resolver configuration: {e}"),
        }
    }

    /// Point the host resolver at `servers`. Failures are logged, not returned.
    pub fn apply_dns(&mut self, servers: &[String]) {
        let mut contents = String::new();
        if self.resolver_backup.is_some() {
            contents.push_str(RESOLVER_HEADER);
            contents.push('\n');
        }
        for server in servers {
            contents.push_str("nameserver ");
            contents.push_str(server);
            contents.push('\n');
        }

        match self.host.write_resolver(&contents) {
            Ok(()) => info!("DNS servers set to {servers:?}"),
            Err(e) => error!("Failed to apply DNS servers: {e}"),
        }
    }

    /// Add each route through `interface`. Invalid or failing routes are
    /// logged and skipped; only successful ones are recorded.
    pub fn add_routes(&mut self, routes: &[String], interface: &str) {
        for route in routes {
            if let Err(e) = validate_route(route) {
                error!("Skipping route {route}: {e}");
                continue;
            }

            match self.host.add_route(route, interface) {
                Ok(()) => {
                    info!("Added route {route} via {interface}");
                    self.added_routes.push(RouteRecord {
                        destination: route.clone(),
                        interface: interface.to_string(),
                    });
                }
                Err(e) => error!("Failed to add route {route}: {e}"),
            }
        }
    }

    /// Remove every recorded route. The record is cleared even when removal fails.
    pub fn revert_routes(&mut self) {
        for record in self.added_routes.drain(..) {
            match self.host.delete_route(&record.destination, &record.interface) {
                Ok(()) => debug!("Removed route {}", record.destination),
                Err(e) => warn!("Failed to remove route {}: {e}", record.destination),
            }
        }
    }

    /// Write the backed-up resolver configuration back. No-op without a backup.
    pub fn restore_resolver(&mut self) {
        let Some(original) = self.resolver_backup.take() else {
            return;
        };

        match self.host.write_resolver(&original) {
            Ok(()) => info!("Restored original resolver configuration"),
            Err(e) => error!("Failed to restore resolver configuration: {e}"),
        }
    }

    /// Assign the session address to `interface`
    pub fn assign_address(&mut self, address: &str, interface: &str) -> Result<()> {
        validate_address(address)?;
        self.host.assign_address(address, interface)?;
        info!("Assigned {address} to {interface}");
        Ok(())
    }

    /// Drop a stale session address from `interface`. Failures are logged.
    pub fn remove_address(&mut self, address: &str, interface: &str) {
        match self.host.remove_address(address, interface) {
            Ok(()) => info!("Removed {address} from {interface}"),
            Err(e) => warn!("Failed to remove {address} from {interface}: {e}"),
        }
    }

    pub fn added_routes(&self) -> &[RouteRecord] {
        &self.added_routes
    }

    pub fn has_resolver_backup(&self) -> bool {
        self.resolver_backup.is_some()
    }

    /// True when nothing remains to be reverted
    pub fn is_clean(&self) -> bool {
        self.added_routes.is_empty() && self.resolver_backup.is_none()
    }
}

impl Drop for NetworkConfigurator {
    fn drop(&mut self) {
        if !self.is_clean() {
            warn!("Network configuration still applied on drop; reverting");
            self.revert_routes();
            self.restore_resolver();
        }
    }
}

fn validate_route(route: &str) -> Result<()> {
    if route == "default" || route.parse::<IpNet>().is_ok() || route.parse::<IpAddr>().is_ok() {
        Ok(())
    } else {
        Err(VpnError::Configuration(format!(
            "Invalid route destination: {route}"
        )))
    }
}

fn validate_address(address: &str) -> Result<()> {
    if address.parse::<IpNet>().is_ok() || address.parse::<IpAddr>().is_ok() {
        Ok(())
    } else {
        Err(VpnError::Configuration(format!(
            "Invalid interface address: {address}"
        )))
    }
}
