//! USB transport for Helios DACs.

use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, UsbContext};

use crate::discovery::Discoverer;
use crate::protocols::helios::protocol::{
    ALT_SETTING, CONTROL_PACKET_SIZE, EP_BULK_OUT, EP_INT_IN, EP_INT_OUT, INTERFACE, PRODUCT_ID,
    VENDOR_ID,
};
use crate::transport::{Transport, TransportConfig, TransportError};
use crate::types::{LogLevel, TransportKind};

/// Timeout for each read while draining stale interrupt data.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(5);

/// Upper bound on packets discarded by one drain.
const MAX_DRAIN_PACKETS: usize = 16;

fn usb_log_level(level: LogLevel) -> rusb::LogLevel {
    match level {
        LogLevel::None => rusb::LogLevel::None,
        LogLevel::Error => rusb::LogLevel::Error,
        LogLevel::Warning => rusb::LogLevel::Warning,
        LogLevel::Info => rusb::LogLevel::Info,
        LogLevel::Debug => rusb::LogLevel::Debug,
    }
}

/// Classify an error raised while claiming the device.
fn open_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Busy => TransportError::InUse,
        rusb::Error::Access => TransportError::PermissionDenied,
        rusb::Error::NoDevice | rusb::Error::NotFound => TransportError::NotFound,
        other => TransportError::disconnected(format!("USB open failed: {other}")),
    }
}

/// Classify an error raised by a transfer on an open device.
fn transfer_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Busy => TransportError::Busy,
        rusb::Error::NoDevice | rusb::Error::Io | rusb::Error::Pipe => {
            TransportError::disconnected(format!("USB device error: {err}"))
        }
        rusb::Error::Overflow | rusb::Error::InvalidParam => {
            TransportError::malformed(format!("USB transfer rejected: {err}"))
        }
        other => TransportError::disconnected(format!("USB transfer failed: {other}")),
    }
}

/// A Helios DAC attached over USB.
pub struct UsbTransport {
    device: Device<Context>,
    handle: Option<DeviceHandle<Context>>,
    endpoint: String,
    config: TransportConfig,
}

impl UsbTransport {
    /// Wrap a discovered device. The device is not claimed until [`Transport::open`].
    pub fn new(device: Device<Context>, config: TransportConfig) -> Self {
        let endpoint = format!("usb:{}:{}", device.bus_number(), device.address());
        Self {
            device,
            handle: None,
            endpoint,
            config,
        }
    }

    fn handle(&self) -> Result<&DeviceHandle<Context>, TransportError> {
        self.handle.as_ref().ok_or(TransportError::NotOpen)
    }
}

impl Transport for UsbTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn open(&mut self) -> Result<(), TransportError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let mut handle = self.device.open().map_err(open_error)?;
        handle.claim_interface(INTERFACE).map_err(open_error)?;
        if let Err(e) = handle.set_alternate_setting(INTERFACE, ALT_SETTING) {
            let _ = handle.release_interface(INTERFACE);
            return Err(open_error(e));
        }

        log::debug!("{}: claimed interface {}", self.endpoint, INTERFACE);
        self.handle = Some(handle);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            let _ = handle.release_interface(INTERFACE);
            log::debug!("{}: released interface {}", self.endpoint, INTERFACE);
        }
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn send_control(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        let written = self
            .handle()?
            .write_interrupt(EP_INT_OUT, packet, self.config.control_timeout)
            .map_err(transfer_error)?;
        if written != packet.len() {
            return Err(TransportError::disconnected(format!(
                "short control write ({written} of {} bytes)",
                packet.len()
            )));
        }
        Ok(())
    }

    fn recv_control(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.handle()?
            .read_interrupt(EP_INT_IN, buf, self.config.control_timeout)
            .map_err(transfer_error)
    }

    fn send_frame(&mut self, payload: &[u8]) -> Result<usize, TransportError> {
        let timeout = self.config.frame_timeout(payload.len());
        let written = match self.handle()?.write_bulk(EP_BULK_OUT, payload, timeout) {
            Ok(n) => n,
            // The device did not take the transfer in time; it is still playing.
            Err(rusb::Error::Timeout) => return Err(TransportError::Busy),
            Err(e) => return Err(transfer_error(e)),
        };
        if written != payload.len() {
            return Err(TransportError::disconnected(format!(
                "short frame write ({written} of {} bytes)",
                payload.len()
            )));
        }
        Ok(written)
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        let handle = self.handle()?;
        let mut buf = [0u8; CONTROL_PACKET_SIZE];
        for _ in 0..MAX_DRAIN_PACKETS {
            match handle.read_interrupt(EP_INT_IN, &mut buf, DRAIN_TIMEOUT) {
                Ok(n) => log::trace!("{}: drained {:02X?}", self.endpoint, &buf[..n]),
                Err(rusb::Error::Timeout) => return Ok(()),
                Err(e) => return Err(transfer_error(e)),
            }
        }
        Ok(())
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Discovers Helios DACs on the USB bus.
pub struct UsbDiscovery {
    context: Option<Context>,
}

impl UsbDiscovery {
    pub fn new() -> Self {
        Self { context: None }
    }

    fn context(&mut self, config: &TransportConfig) -> Result<&mut Context, TransportError> {
        if self.context.is_none() {
            let context = Context::new()
                .map_err(|e| TransportError::Unavailable(format!("libusb: {e}")))?;
            self.context = Some(context);
        }
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| TransportError::Unavailable("libusb context missing".into()))?;
        context.set_log_level(usb_log_level(config.log_level));
        Ok(context)
    }
}

impl Default for UsbDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Discoverer for UsbDiscovery {
    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }

    fn scan(
        &mut self,
        config: &TransportConfig,
    ) -> Result<Vec<Box<dyn Transport>>, TransportError> {
        let context = self.context(config)?;
        let devices = context
            .devices()
            .map_err(|e| TransportError::Unavailable(format!("USB enumeration failed: {e}")))?;

        let mut found: Vec<Box<dyn Transport>> = Vec::new();
        for device in devices.iter() {
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            if descriptor.vendor_id() != VENDOR_ID || descriptor.product_id() != PRODUCT_ID {
                continue;
            }
            let transport = UsbTransport::new(device, config.clone());
            log::debug!("found Helios USB DAC at {}", transport.endpoint());
            found.push(Box::new(transport));
        }
        Ok(found)
    }
}
