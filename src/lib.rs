//! rsslvpn - SSL-tunneled VPN client
//!
//! Connects to a gateway over TLS, authenticates with a username and password,
//! receives network parameters, and relays IP packets between a local TUN
//! device and the encrypted stream.
//!
//! ## Layout
//! - [`protocol`]: frame codec, authentication artifacts, session state
//! - [`network`]: host routes, resolver and interface address, with exact undo
//! - [`tunnel`]: the orchestrator, its state machine and capability traits
//! - [`config`] / [`profiles`]: TOML configuration and saved profiles

pub mod config;
pub mod crypto;
pub mod error;
pub mod network;
pub mod profiles;
pub mod protocol;
pub mod tunnel;

// Re-export core types
pub use config::Config;
pub use error::{FaultClass, Result, VpnError};
pub use tunnel::{Tunnel, TunnelOptions, TunnelState};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
