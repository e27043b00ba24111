//! Host network operations backed by the `ip` utility and the resolver file

use crate::error::{Result, VpnError};
use crate::network::HostNetwork;
use log::debug;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

/// Real host network access. Requires root.
#[derive(Debug, Clone)]
pub struct SystemNetwork {
    resolv_conf: PathBuf,
    ip_command: String,
}

impl SystemNetwork {
    pub fn new(resolv_conf: impl Into<PathBuf>) -> Self {
        Self {
            resolv_conf: resolv_conf.into(),
            ip_command: "ip".to_string(),
        }
    }

    /// Use a different `ip` binary
    pub fn with_ip_command(mut self, command: impl Into<String>) -> Self {
        self.ip_command = command.into();
        self
    }

    fn run_ip(&self, args: &[&str]) -> Result<()> {
        debug!("{} {}", self.ip_command, args.join(" "));

        let output = Command::new(&self.ip_command)
            .args(args)
            .output()
            .map_err(|e| {
                VpnError::Configuration(format!("Failed to run {}: {e}", self.ip_command))
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(VpnError::Configuration(format!(
                "{} {} failed: {}",
                self.ip_command,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl Default for SystemNetwork {
    fn default() -> Self {
        Self::new("/etc/resolv.conf")
    }
}

impl HostNetwork for SystemNetwork {
    fn assign_address(&mut self, address: &str, interface: &str) -> Result<()> {
        self.run_ip(&["addr", "add", address, "dev", interface])
    }

    fn remove_address(&mut self, address: &str, interface: &str) -> Result<()> {
        self.run_ip(&["addr", "del", address, "dev", interface])
    }

    fn add_route(&mut self, destination: &str, interface: &str) -> Result<()> {
        self.run_ip(&["route", "add", destination, "dev", interface])
    }

    fn delete_route(&mut self, destination: &str, interface: &str) -> Result<()> {
        self.run_ip(&["route", "del", destination, "dev", interface])
    }

    fn read_resolver(&mut self) -> Result<String> {
        fs::read_to_string(&self.resolv_conf).map_err(|e| {
            VpnError::Configuration(format!(
                "Cannot read {}: {e}",
                self.resolv_conf.display()
            ))
        })
    }

    fn write_resolver(&mut self, contents: &str) -> Result<()> {
        fs::write(&self.resolv_conf, contents).map_err(|e| {
            VpnError::Configuration(format!(
                "Cannot write {}: {e}",
                self.resolv_conf.display()
            ))
        })
    }
}
