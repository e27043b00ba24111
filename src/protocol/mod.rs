//! Tunnel wire protocol: framing, authentication and session state

pub mod auth;
pub mod frame;
pub mod session;

pub use auth::{AuthNegotiator, ControlMessage, Credentials, TlsVersion, TransportPolicy};
pub use frame::{Frame, FrameStream, FrameType};
pub use session::{ConfigUpdate, NetworkParameters, SessionState};

// Protocol constants
pub mod constants {
    pub const DEFAULT_PORT: u16 = 443;
    /// Read size for packets coming off the TUN device
    pub const DEVICE_READ_SIZE: usize = 1500;
    /// Read size for data arriving from the gateway
    pub const TRANSPORT_READ_SIZE: usize = 1520;
}
