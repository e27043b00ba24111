//! Cryptographic configuration for the secure transport

pub mod tls;

pub use tls::TlsConfig;
