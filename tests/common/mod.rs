//! In-memory gateway, device and host used by the scenario tests
#![allow(dead_code)]

use rsslvpn::error::{FaultClass, Result, VpnError};
use rsslvpn::network::HostNetwork;
use rsslvpn::protocol::frame::{Frame, FrameStream, FrameType};
use rsslvpn::protocol::session::{NetworkParameters, SessionState};
use rsslvpn::protocol::{AuthNegotiator, Credentials, TransportPolicy};
use rsslvpn::tunnel::{DeviceProvider, SecureTransport, SessionObserver, TunnelDevice};
use rsslvpn::{TunnelOptions, TunnelState};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

pub const ORIGINAL_RESOLVER: &str = "nameserver 192.168.1.1\nsearch lan\n";

pub fn options(auto_reconnect: bool, max_retries: u32) -> TunnelOptions {
    let mut options = TunnelOptions::new("gateway.test", 443);
    options.auto_reconnect = auto_reconnect;
    options.max_retries = max_retries;
    options.retry_delay = Duration::ZERO;
    options.connect_timeout = Duration::from_secs(5);
    options
}

pub fn alice() -> AuthNegotiator {
    AuthNegotiator::new(Credentials::new("alice", "wonderland"), false)
}

/// Client half handed to the transport, server half driven by the test
pub fn gateway_pair() -> (DuplexStream, Gateway) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    (
        client,
        Gateway {
            link: FrameStream::new(server),
        },
    )
}

/// Transport whose connections come from a prepared queue
pub struct ScriptedTransport {
    streams: Mutex<VecDeque<DuplexStream>>,
    opens: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(streams: Vec<DuplexStream>) -> Self {
        Self {
            streams: Mutex::new(streams.into()),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of `open` calls
    pub fn opens(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }
}

impl SecureTransport for ScriptedTransport {
    type Raw = DuplexStream;
    type Stream = DuplexStream;

    async fn open(&self, _host: &str, _port: u16) -> Result<DuplexStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.streams.lock().unwrap().pop_front().ok_or_else(|| {
            VpnError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "no gateway listening",
            ))
        })
    }

    async fn handshake(
        &self,
        raw: DuplexStream,
        _host: &str,
        _policy: &TransportPolicy,
    ) -> Result<DuplexStream> {
        Ok(raw)
    }
}

/// Server side of one connection
pub struct Gateway {
    link: FrameStream<DuplexStream>,
}

impl Gateway {
    pub async fn expect_auth(&mut self) -> serde_json::Value {
        let frame = self.link.read_frame().await.expect("auth frame");
        assert_eq!(frame.frame_type, FrameType::Auth);
        frame.parse_json().expect("auth payload")
    }

    pub async fn send_config(&mut self, value: serde_json::Value) {
        let frame = Frame::json(FrameType::Config, &value).unwrap();
        self.link.write_frame(&frame).await.unwrap();
    }

    pub async fn send_control(&mut self, status: &str, message: Option<&str>) {
        let mut value = serde_json::json!({ "status": status });
        if let Some(message) = message {
            value["message"] = serde_json::Value::from(message);
        }
        let frame = Frame::json(FrameType::Control, &value).unwrap();
        self.link.write_frame(&frame).await.unwrap();
    }

    pub async fn send_data(&mut self, packet: &[u8]) {
        self.link.write_frame(&Frame::data(packet)).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let stream = self.link.get_mut();
        stream.write_all(bytes).await.unwrap();
        stream.flush().await.unwrap();
    }

    pub async fn recv(&mut self) -> Result<Frame> {
        self.link.read_frame().await
    }

    /// Accept alice with the given parameters
    pub async fn accept(&mut self, config: serde_json::Value) {
        let auth = self.expect_auth().await;
        assert_eq!(auth["username"], "alice");
        self.send_config(config).await;
        self.send_control("success", None).await;
    }
}

#[derive(Debug, Default, Clone)]
pub struct DeviceLog {
    pub opened: usize,
    pub up: bool,
    pub downs: usize,
    pub closed: bool,
    /// Packets read off the device so far
    pub reads: usize,
    /// Value of `reads` when the first packet was written to the device
    pub reads_at_first_write: Option<usize>,
}

/// Test side of a memory device
pub struct DeviceHandle {
    pub inject: mpsc::UnboundedSender<Vec<u8>>,
    pub written: mpsc::UnboundedReceiver<Vec<u8>>,
    pub log: Arc<Mutex<DeviceLog>>,
}

pub struct MemoryProvider {
    channels: Mutex<Option<(mpsc::UnboundedReceiver<Vec<u8>>, mpsc::UnboundedSender<Vec<u8>>)>>,
    log: Arc<Mutex<DeviceLog>>,
}

impl MemoryProvider {
    pub fn new() -> (Self, DeviceHandle) {
        let (inject, inbound) = mpsc::unbounded_channel();
        let (outbound, written) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(DeviceLog::default()));
        (
            Self {
                channels: Mutex::new(Some((inbound, outbound))),
                log: Arc::clone(&log),
            },
            DeviceHandle {
                inject,
                written,
                log,
            },
        )
    }
}

impl DeviceProvider for MemoryProvider {
    type Device = MemoryDevice;

    fn open(&self, name: &str, _mtu: u16) -> Result<MemoryDevice> {
        let (inbound, outbound) = self
            .channels
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| VpnError::TunTap("memory device already opened".into()))?;
        self.log.lock().unwrap().opened += 1;
        Ok(MemoryDevice {
            name: name.to_string(),
            inbound,
            outbound,
            closed: false,
            log: Arc::clone(&self.log),
        })
    }
}

pub struct MemoryDevice {
    name: String,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    closed: bool,
    log: Arc<Mutex<DeviceLog>>,
}

impl TunnelDevice for MemoryDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn up(&mut self) -> Result<()> {
        self.log.lock().unwrap().up = true;
        Ok(())
    }

    fn down(&mut self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.up = false;
        log.downs += 1;
        Ok(())
    }

    async fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return std::future::pending().await;
        }
        match self.inbound.recv().await {
            Some(packet) => {
                self.log.lock().unwrap().reads += 1;
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                Ok(len)
            }
            None => std::future::pending().await,
        }
    }

    async fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "device closed"));
        }
        {
            let mut log = self.log.lock().unwrap();
            if log.reads_at_first_write.is_none() {
                log.reads_at_first_write = Some(log.reads);
            }
        }
        let _ = self.outbound.send(packet.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HostLog {
    pub addresses: Vec<(String, String)>,
    pub addresses_removed: Vec<String>,
    pub routes_added: Vec<String>,
    pub routes_deleted: Vec<String>,
    pub resolver: String,
    pub resolver_writes: usize,
    /// Addresses `assign_address` refuses
    pub rejected_addresses: Vec<String>,
}

/// Host network that only records what it is asked to do
#[derive(Clone)]
pub struct RecordingHost {
    pub log: Arc<Mutex<HostLog>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(HostLog {
                addresses: Vec::new(),
                addresses_removed: Vec::new(),
                routes_added: Vec::new(),
                routes_deleted: Vec::new(),
                resolver: ORIGINAL_RESOLVER.to_string(),
                resolver_writes: 0,
                rejected_addresses: Vec::new(),
            })),
        }
    }

    pub fn snapshot(&self) -> HostLog {
        self.log.lock().unwrap().clone()
    }
}

impl HostNetwork for RecordingHost {
    fn assign_address(&mut self, address: &str, interface: &str) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if log.rejected_addresses.iter().any(|a| a == address) {
            return Err(VpnError::Configuration(format!(
                "RTNETLINK answers: Permission denied ({address})"
            )));
        }
        log.addresses
            .push((address.to_string(), interface.to_string()));
        Ok(())
    }

    fn remove_address(&mut self, address: &str, _interface: &str) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .addresses_removed
            .push(address.to_string());
        Ok(())
    }

    fn add_route(&mut self, destination: &str, _interface: &str) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .routes_added
            .push(destination.to_string());
        Ok(())
    }

    fn delete_route(&mut self, destination: &str, _interface: &str) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .routes_deleted
            .push(destination.to_string());
        Ok(())
    }

    fn read_resolver(&mut self) -> Result<String> {
        Ok(self.log.lock().unwrap().resolver.clone())
    }

    fn write_resolver(&mut self, contents: &str) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.resolver = contents.to_string();
        log.resolver_writes += 1;
        Ok(())
    }
}

#[derive(Default)]
struct ObserverLog {
    transitions: Vec<(TunnelState, TunnelState)>,
    updates: Vec<NetworkParameters>,
    faults: Vec<(String, FaultClass)>,
}

#[derive(Clone, Default)]
pub struct RecordingObserver {
    log: Arc<Mutex<ObserverLog>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target state of every transition, in order
    pub fn states(&self) -> Vec<TunnelState> {
        self.log
            .lock()
            .unwrap()
            .transitions
            .iter()
            .map(|(_, to)| *to)
            .collect()
    }

    pub fn updates(&self) -> Vec<NetworkParameters> {
        self.log.lock().unwrap().updates.clone()
    }

    pub fn faults(&self) -> Vec<(String, FaultClass)> {
        self.log.lock().unwrap().faults.clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn state_changed(&self, from: TunnelState, to: TunnelState) {
        self.log.lock().unwrap().transitions.push((from, to));
    }

    fn session_updated(&self, session: &SessionState) {
        self.log.lock().unwrap().updates.push(session.parameters());
    }

    fn fault(&self, error: &VpnError, class: FaultClass) {
        self.log
            .lock()
            .unwrap()
            .faults
            .push((error.to_string(), class));
    }
}
