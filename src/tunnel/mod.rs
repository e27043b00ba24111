//! Tunnel orchestration
//!
//! `Tunnel` drives one logical VPN session: connect and authenticate, bring up
//! the device, apply the gateway's network parameters, pump packets, reconnect
//! on transport faults, and undo everything on teardown.

use crate::config::Config;
use crate::error::{FaultClass, Result, VpnError};
use crate::network::{HostNetwork, NetworkConfigurator};
use crate::protocol::auth::{AuthNegotiator, ControlMessage};
use crate::protocol::constants::DEVICE_READ_SIZE;
use crate::protocol::frame::{Frame, FrameStream, FrameType};
use crate::protocol::session::{ConfigUpdate, NetworkParameters, SessionState};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;

pub mod device;
pub mod retry;
pub mod shutdown;
pub mod state;
pub mod transport;

pub use device::{DeviceProvider, TunDevice, TunProvider, TunnelDevice};
pub use retry::RetryBudget;
pub use shutdown::{ShutdownHandle, ShutdownSignal};
pub use state::{LogObserver, SessionObserver, TunnelState};
pub use transport::{SecureTransport, TlsTransport};

/// Upper bound on waiting for the transport to close during teardown
const LINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Knobs for one tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelOptions {
    pub host: String,
    pub port: u16,
    pub auto_reconnect: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub interface_name: String,
    pub mtu: u16,
    /// Bound on a single establishment attempt (connect through ack)
    pub connect_timeout: Duration,
}

impl TunnelOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            auto_reconnect: false,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            interface_name: "tun0".to_string(),
            mtu: 1500,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for TunnelOptions {
    fn from(config: &Config) -> Self {
        Self {
            host: config.server.hostname.clone(),
            port: config.server.port,
            auto_reconnect: config.reconnect.auto_reconnect,
            max_retries: config.reconnect.max_retries,
            retry_delay: Duration::from_secs(u64::from(config.reconnect.retry_delay)),
            interface_name: config.network.interface_name.clone(),
            mtu: config.network.mtu,
            connect_timeout: Duration::from_secs(u64::from(config.server.timeout)),
        }
    }
}

enum RelayStep {
    Continue,
    Stop,
}

enum RelayEvent {
    Shutdown,
    Device(std::io::Result<usize>),
    Transport(Result<Frame>),
}

/// Drives a tunnel session over a secure transport and a packet device
pub struct Tunnel<T: SecureTransport, P: DeviceProvider> {
    options: TunnelOptions,
    transport: T,
    devices: P,
    auth: AuthNegotiator,
    session: SessionState,
    network: NetworkConfigurator,
    observer: Arc<dyn SessionObserver>,
    state: TunnelState,
    link: Option<FrameStream<T::Stream>>,
    device: Option<P::Device>,
    applied: Option<NetworkParameters>,
    /// Which read the relay polls first on the next iteration
    transport_first: bool,
    retry: RetryBudget,
    shutdown_handle: ShutdownHandle,
    shutdown: ShutdownSignal,
}

impl<T: SecureTransport, P: DeviceProvider> Tunnel<T, P> {
    pub fn new(
        options: TunnelOptions,
        transport: T,
        devices: P,
        auth: AuthNegotiator,
        host: Box<dyn HostNetwork>,
    ) -> Self {
        let retry = if options.auto_reconnect {
            RetryBudget::new(options.max_retries, options.retry_delay)
        } else {
            RetryBudget::disabled()
        };
        let (shutdown_handle, shutdown) = shutdown::channel();

        Self {
            options,
            transport,
            devices,
            auth,
            session: SessionState::new(),
            network: NetworkConfigurator::new(host),
            observer: Arc::new(LogObserver),
            state: TunnelState::Disconnected,
            link: None,
            device: None,
            applied: None,
            transport_first: false,
            retry,
            shutdown_handle,
            shutdown,
        }
    }

    /// Replace the default `LogObserver`
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn retry_budget(&self) -> &RetryBudget {
        &self.retry
    }

    pub fn network(&self) -> &NetworkConfigurator {
        &self.network
    }

    pub fn options(&self) -> &TunnelOptions {
        &self.options
    }

    /// Handle that stops the tunnel from another task or a signal handler
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown_handle.clone()
    }

    /// Connect, handshake and authenticate, retrying within the budget.
    /// Returns the last establishment error when every attempt failed.
    pub async fn connect(&mut self) -> Result<()> {
        if self.session.is_connected() {
            return Err(VpnError::InvalidState("Tunnel is already connected".into()));
        }

        match self.establish(false).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.release_link().await;
                self.session.mark_disconnected();
                self.transition(TunnelState::Disconnected);
                Err(err)
            }
        }
    }

    /// Open the device, bring it up and assign the session address
    pub fn setup_device(&mut self) -> Result<()> {
        if !self.session.is_connected() {
            return Err(VpnError::InvalidState(
                "Cannot set up the device without a connected session".into(),
            ));
        }
        if self.device.is_some() {
            return Ok(());
        }

        let mut device = self
            .devices
            .open(&self.options.interface_name, self.options.mtu)?;
        if let Err(e) = device.up() {
            if let Err(close) = device.close() {
                warn!("Failed to close device after bring-up error: {close}");
            }
            return Err(e);
        }

        match self.session.interface_address() {
            Some(address) => {
                if let Err(e) = self.network.assign_address(address, device.name()) {
                    if let Err(down) = device.down() {
                        warn!("Failed to bring device down: {down}");
                    }
                    if let Err(close) = device.close() {
                        warn!("Failed to close device: {close}");
                    }
                    return Err(e);
                }
            }
            None => warn!("Gateway did not assign an interface address"),
        }

        self.device = Some(device);
        Ok(())
    }

    /// Apply the session's DNS servers and routes to the host
    pub fn apply_network_configuration(&mut self) -> Result<()> {
        let interface = match self.device.as_ref() {
            Some(device) => device.name().to_string(),
            None => {
                return Err(VpnError::InvalidState(
                    "Network configuration needs an open device".into(),
                ))
            }
        };

        let params = self.session.parameters();
        if !params.dns_servers.is_empty() {
            self.network.backup_resolver();
            self.network.apply_dns(&params.dns_servers);
        }
        if !params.routes.is_empty() {
            self.network.add_routes(&params.routes, &interface);
        }

        self.applied = Some(params);
        Ok(())
    }

    /// Pump packets until shutdown, an unrecoverable fault, or an exhausted
    /// reconnect budget. Always tears the tunnel down before returning.
    pub async fn start_relay(&mut self) -> Result<()> {
        if !self.session.is_connected() || self.link.is_none() || self.device.is_none() {
            return Err(VpnError::InvalidState(
                "Relay needs a connected session and an open device".into(),
            ));
        }

        self.transition(TunnelState::Relaying);
        let mut packet = vec![0u8; usize::from(self.options.mtu).max(DEVICE_READ_SIZE)];

        loop {
            if self.shutdown.is_triggered() {
                info!("Shutdown requested; stopping relay");
                break;
            }

            match self.relay_once(&mut packet).await {
                Ok(RelayStep::Continue) => {}
                Ok(RelayStep::Stop) => {
                    info!("Shutdown requested; stopping relay");
                    break;
                }
                Err(err) => {
                    let class = err.classify();
                    self.observer.fault(&err, class);
                    match class {
                        FaultClass::Recoverable => {
                            warn!("Transport fault: {err}");
                            if let Err(e) = self.recover().await {
                                error!("Reconnect failed: {e}");
                                break;
                            }
                        }
                        FaultClass::Unrecoverable => {
                            error!("Relay stopped: {err}");
                            break;
                        }
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Undo everything this tunnel did to the host. Safe to call repeatedly.
    pub async fn cleanup(&mut self) {
        if !self.state.is_active()
            && self.device.is_none()
            && self.link.is_none()
            && self.network.is_clean()
        {
            return;
        }

        info!("Tearing down tunnel");
        self.network.revert_routes();
        self.network.restore_resolver();

        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.down() {
                warn!("Failed to bring {} down: {e}", device.name());
            }
            if let Err(e) = device.close() {
                warn!("Failed to close {}: {e}", device.name());
            }
        }

        self.release_link().await;
        self.session.reset();
        self.applied = None;
        self.transition(TunnelState::Disconnected);
    }

    /// Connect, set up the device, apply the network configuration and relay.
    /// Cleanup runs whatever the outcome.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.run_session().await;
        self.cleanup().await;
        result
    }

    async fn run_session(&mut self) -> Result<()> {
        self.connect().await?;
        self.setup_device()?;
        self.apply_network_configuration()?;
        self.start_relay().await
    }

    async fn establish(&mut self, reconnecting: bool) -> Result<()> {
        if reconnecting {
            self.begin_retry().await?;
        }

        loop {
            let err = match self.attempt().await {
                Ok(()) => {
                    self.retry.reset();
                    return Ok(());
                }
                Err(err) => err,
            };

            if matches!(err, VpnError::Cancelled(_)) {
                return Err(err);
            }

            warn!(
                "Connection attempt to {}:{} failed: {err}",
                self.options.host, self.options.port
            );
            self.observer.fault(&err, err.classify());
            self.release_link().await;
            self.session.mark_disconnected();

            // Bad credentials will not improve with another attempt
            if matches!(err, VpnError::AuthRejected(_)) {
                return Err(err);
            }

            match self.begin_retry().await {
                Ok(()) => {}
                Err(cancelled @ VpnError::Cancelled(_)) => return Err(cancelled),
                Err(_) => return Err(err),
            }
        }
    }

    /// Spend one unit of budget and wait out the retry delay
    async fn begin_retry(&mut self) -> Result<()> {
        if self.shutdown.is_triggered() {
            return Err(VpnError::Cancelled("shutdown requested".into()));
        }
        if !self.retry.try_consume() {
            return Err(VpnError::RetryLimitExceeded(format!(
                "gave up after {} attempts",
                self.retry.max_attempts()
            )));
        }

        self.transition(TunnelState::Reconnecting);
        let delay = self.retry.delay();
        info!(
            "Reconnect attempt {}/{} in {:?}",
            self.retry.attempts(),
            self.retry.max_attempts(),
            delay
        );

        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            _ = shutdown.wait() => Err(VpnError::Cancelled("shutdown requested during retry delay".into())),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn attempt(&mut self) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        let limit = self.options.connect_timeout;

        tokio::select! {
            biased;
            _ = shutdown.wait() => Err(VpnError::Cancelled("shutdown requested during connect".into())),
            result = tokio::time::timeout(limit, self.negotiate()) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(VpnError::Timeout(format!(
                    "connection attempt exceeded {limit:?}"
                ))),
            },
        }
    }

    async fn negotiate(&mut self) -> Result<()> {
        self.transition(TunnelState::Connecting);
        let raw = self
            .transport
            .open(&self.options.host, self.options.port)
            .await?;

        self.transition(TunnelState::Handshaking);
        let stream = self
            .transport
            .handshake(raw, &self.options.host, self.auth.transport_policy())
            .await?;
        let mut link = FrameStream::new(stream);

        self.transition(TunnelState::Authenticating);
        info!("Authenticating as {}", self.auth.username());
        link.write_frame(&self.auth.auth_frame()?).await?;
        self.await_acknowledgment(&mut link).await?;

        self.session.mark_connected();
        self.link = Some(link);
        self.transition(TunnelState::Connected);
        Ok(())
    }

    async fn await_acknowledgment(&mut self, link: &mut FrameStream<T::Stream>) -> Result<()> {
        loop {
            let frame = match link.read_frame().await {
                Ok(frame) => frame,
                Err(VpnError::TransportClosed) => {
                    return Err(VpnError::Protocol(
                        "Gateway closed the connection before acknowledging authentication"
                            .into(),
                    ))
                }
                Err(e) => return Err(e),
            };

            match frame.frame_type {
                FrameType::Config => {
                    let update: ConfigUpdate = frame.parse_json()?;
                    self.transition(TunnelState::ConfiguringSession);
                    self.session.apply_config(&update);
                    self.observer.session_updated(&self.session);
                }
                FrameType::Control => {
                    let message: ControlMessage = frame.parse_json()?;
                    if message.is_success() {
                        self.transition(TunnelState::ConfiguringSession);
                        info!("Authentication accepted");
                        return Ok(());
                    }
                    return Err(VpnError::AuthRejected(
                        message.message.unwrap_or_else(|| "unknown error".to_string()),
                    ));
                }
                other => debug!("Ignoring {other:?} frame while awaiting authentication"),
            }
        }
    }

    async fn relay_once(&mut self, buf: &mut [u8]) -> Result<RelayStep> {
        let transport_first = self.transport_first;
        self.transport_first = !transport_first;

        let (Some(link), Some(device)) = (self.link.as_mut(), self.device.as_mut()) else {
            return Err(VpnError::InvalidState("Relay lost its transport or device".into()));
        };
        let mut shutdown = self.shutdown.clone();

        // Shutdown first, then the two reads alternate priority
        let event = if transport_first {
            tokio::select! {
                biased;
                _ = shutdown.wait() => RelayEvent::Shutdown,
                frame = link.read_frame() => RelayEvent::Transport(frame),
                read = device.read_packet(buf) => RelayEvent::Device(read),
            }
        } else {
            tokio::select! {
                biased;
                _ = shutdown.wait() => RelayEvent::Shutdown,
                read = device.read_packet(buf) => RelayEvent::Device(read),
                frame = link.read_frame() => RelayEvent::Transport(frame),
            }
        };

        match event {
            RelayEvent::Shutdown => Ok(RelayStep::Stop),
            RelayEvent::Device(read) => {
                let len =
                    read.map_err(|e| VpnError::TunTap(format!("Device read failed: {e}")))?;
                if len == 0 {
                    return Err(VpnError::TunTap(format!("Device {} closed", device.name())));
                }
                link.write_frame(&Frame::data(&buf[..len])).await?;
                Ok(RelayStep::Continue)
            }
            RelayEvent::Transport(frame) => {
                let frame = frame?;
                match frame.frame_type {
                    FrameType::Data => {
                        device
                            .write_packet(&frame.payload)
                            .await
                            .map_err(|e| VpnError::TunTap(format!("Device write failed: {e}")))?;
                    }
                    FrameType::Config => match frame.parse_json::<ConfigUpdate>() {
                        Ok(update) => {
                            info!("Gateway sent a configuration update");
                            self.session.apply_config(&update);
                            self.observer.session_updated(&self.session);
                        }
                        Err(e) => warn!("Ignoring config update: {e}"),
                    },
                    FrameType::Control => match frame.parse_json::<ControlMessage>() {
                        Ok(message) if message.is_success() => debug!("Gateway status: ok"),
                        Ok(message) => warn!(
                            "Gateway reported {}: {}",
                            message.status,
                            message.message.as_deref().unwrap_or("no details")
                        ),
                        Err(e) => warn!("Ignoring control frame: {e}"),
                    },
                    FrameType::Auth => debug!("Ignoring auth frame from gateway"),
                }
                Ok(RelayStep::Continue)
            }
        }
    }

    async fn recover(&mut self) -> Result<()> {
        self.release_link().await;
        self.session.mark_disconnected();
        self.transition(TunnelState::Reconnecting);

        self.establish(true).await?;
        self.refresh_network_configuration()?;
        self.transition(TunnelState::Relaying);
        info!("Tunnel re-established");
        Ok(())
    }

    /// Re-apply host configuration when the gateway handed out different
    /// parameters on reconnect
    fn refresh_network_configuration(&mut self) -> Result<()> {
        let Some(previous) = self.applied.clone() else {
            return Ok(());
        };
        let current = self.session.parameters();
        if previous == current {
            debug!("Session parameters unchanged after reconnect");
            return Ok(());
        }

        info!("Session parameters changed; re-applying network configuration");
        self.network.revert_routes();
        if current.dns_servers.is_empty() {
            self.network.restore_resolver();
        }

        if previous.interface_address != current.interface_address {
            if let Some(device) = self.device.as_ref() {
                let interface = device.name().to_string();
                if let Some(stale) = previous.interface_address.as_deref() {
                    self.network.remove_address(stale, &interface);
                }
                if let Some(address) = current.interface_address.as_deref() {
                    if let Err(e) = self.network.assign_address(address, &interface) {
                        error!("Failed to assign new address {address}: {e}");
                    }
                }
            }
        }

        self.apply_network_configuration()
    }

    async fn release_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            match tokio::time::timeout(LINK_CLOSE_TIMEOUT, link.close()).await {
                Ok(Ok(())) => debug!("Transport closed"),
                Ok(Err(e)) => debug!("Transport close failed: {e}"),
                Err(_) => warn!("Timed out closing transport"),
            }
        }
    }

    fn transition(&mut self, to: TunnelState) {
        if self.state != to {
            let from = self.state;
            self.state = to;
            self.observer.state_changed(from, to);
        }
    }
}
