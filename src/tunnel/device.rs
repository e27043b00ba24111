//! Virtual network device capability
//!
//! The orchestrator only needs to open, raise, read, write and close a device.
//! `TunProvider` supplies a real TUN interface via the `tun` crate; tests use
//! in-memory devices.

use crate::error::{Result, VpnError};
use log::{debug, info};
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tun::Device as _;

/// An open packet device
#[allow(async_fn_in_trait)]
pub trait TunnelDevice {
    /// Interface name as seen by the host
    fn name(&self) -> &str;

    /// Bring the interface up
    fn up(&mut self) -> Result<()>;

    /// Bring the interface down
    fn down(&mut self) -> Result<()>;

    /// Read one packet into `buf`, returning its length
    async fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write one packet
    async fn write_packet(&mut self, packet: &[u8]) -> io::Result<()>;

    /// Release the device. Further reads and writes fail.
    fn close(&mut self) -> Result<()>;
}

/// Opens devices for the orchestrator
pub trait DeviceProvider {
    type Device: TunnelDevice;

    fn open(&self, name: &str, mtu: u16) -> Result<Self::Device>;
}

/// Creates kernel TUN interfaces. Requires root.
#[derive(Debug, Default, Clone, Copy)]
pub struct TunProvider;

impl DeviceProvider for TunProvider {
    type Device = TunDevice;

    fn open(&self, name: &str, mtu: u16) -> Result<TunDevice> {
        let mut config = tun::Configuration::default();
        config.name(name).mtu(i32::from(mtu));

        #[cfg(target_os = "linux")]
        config.platform(|config| {
            config.packet_information(false);
        });

        let device = tun::create_as_async(&config)
            .map_err(|e| VpnError::TunTap(format!("Failed to create TUN device {name}: {e}")))?;
        info!("TUN interface '{name}' created (mtu {mtu})");

        Ok(TunDevice {
            name: name.to_string(),
            inner: Some(device),
        })
    }
}

/// TUN interface backed by `tun::AsyncDevice`
pub struct TunDevice {
    name: String,
    inner: Option<tun::AsyncDevice>,
}

impl TunDevice {
    fn device(&mut self) -> io::Result<&mut tun::AsyncDevice> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "TUN device closed"))
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        let name = self.name.clone();
        self.device()?
            .get_mut()
            .enabled(enabled)
            .map_err(|e| VpnError::TunTap(format!("Failed to set {name} enabled={enabled}: {e}")))
    }
}

impl TunnelDevice for TunDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn up(&mut self) -> Result<()> {
        self.set_enabled(true)?;
        debug!("{} is up", self.name);
        Ok(())
    }

    fn down(&mut self) -> Result<()> {
        self.set_enabled(false)?;
        debug!("{} is down", self.name);
        Ok(())
    }

    async fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.device()?.read(buf).await
    }

    async fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        self.device()?.write_all(packet).await
    }

    fn close(&mut self) -> Result<()> {
        if self.inner.take().is_some() {
            info!("TUN interface '{}' closed", self.name);
        }
        Ok(())
    }
}
