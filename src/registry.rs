//! Device registry: the ordered collection of open sessions.
//!
//! Indices are stable until the next [`open`](DeviceRegistry::open) or
//! [`close_all`](DeviceRegistry::close_all).
//! [`rescan`](DeviceRegistry::rescan) closes vanished devices in their slot
//! and appends new ones, so a cached index never reaches another device. An
//! index past the end yields [`Error::NotFound`].

use std::collections::HashSet;

use crate::discovery::{DeviceDiscovery, Discoverer};
use crate::error::{Error, Result};
use crate::session::DeviceSession;
use crate::transport::{Transport, TransportConfig};
use crate::types::{
    DeviceStatus, LogLevel, Point, PointExt, PointHighRes, TransportFilter, WriteFrameFlags,
    WriteStatus,
};

/// Owner of every device session.
///
/// Dropping the registry closes all sessions.
///
/// # Example
///
/// ```no_run
/// use helios_dac::{DeviceRegistry, DeviceStatus, Point, TransportConfig, WriteFrameFlags};
///
/// let mut registry = DeviceRegistry::new(TransportConfig::default());
/// let count = registry.open_all()?;
/// println!("{} device(s)", count);
///
/// let frame: Vec<Point> = (0..1000)
///     .map(|i| Point::new((i * 4) as u16, 2048, 255, 0, 0, 255))
///     .collect();
/// for index in 0..registry.len() {
///     if registry.status(index)? == DeviceStatus::Ready {
///         registry.write_frame(index, 30_000, WriteFrameFlags::empty(), &frame)?;
///     }
/// }
/// # Ok::<(), helios_dac::Error>(())
/// ```
pub struct DeviceRegistry {
    discovery: DeviceDiscovery,
    sessions: Vec<DeviceSession>,
}

impl DeviceRegistry {
    /// Registry using the built-in discoverers.
    pub fn new(config: TransportConfig) -> Self {
        Self::with_discovery(DeviceDiscovery::new(config))
    }

    /// Registry using a caller-assembled discovery coordinator.
    pub fn with_discovery(discovery: DeviceDiscovery) -> Self {
        Self {
            discovery,
            sessions: Vec::new(),
        }
    }

    /// Add a discoverer used by subsequent opens and rescans.
    pub fn register(&mut self, discoverer: Box<dyn Discoverer>) {
        self.discovery.register(discoverer);
    }

    pub fn config(&self) -> &TransportConfig {
        self.discovery.config()
    }

    /// Replace the transport configuration for subsequently discovered
    /// devices. Open sessions keep the configuration they were opened with.
    pub fn set_config(&mut self, config: TransportConfig) {
        self.discovery.set_config(config);
    }

    /// Set the transport diagnostics verbosity for subsequently discovered
    /// devices.
    pub fn set_log_level(&mut self, level: LogLevel) {
        self.discovery.set_log_level(level);
    }

    // =========================================================================
    // Open / Rescan / Close
    // =========================================================================

    /// Close every session, discover devices passing `filter` and open them.
    ///
    /// Returns the number of sessions opened. Devices that fail to open are
    /// logged and skipped.
    pub fn open(&mut self, filter: TransportFilter) -> Result<usize> {
        self.close_all();
        let transports = self.discovery.scan(filter)?;
        for transport in transports {
            if let Some(session) = self.open_session(transport) {
                self.sessions.push(session);
            }
        }
        log::info!("opened {} device(s)", self.sessions.len());
        Ok(self.sessions.len())
    }

    pub fn open_all(&mut self) -> Result<usize> {
        self.open(TransportFilter::Both)
    }

    pub fn open_only_usb(&mut self) -> Result<usize> {
        self.open(TransportFilter::Usb)
    }

    pub fn open_only_network(&mut self) -> Result<usize> {
        self.open(TransportFilter::Network)
    }

    /// Reconcile the session list with a fresh discovery pass.
    ///
    /// Existing sessions keep their index. Connected sessions of a kind
    /// passing `filter` whose endpoint is no longer discovered are closed in
    /// place, so their slot reports [`is_closed`](Self::is_closed) and every
    /// operation on it fails with [`Error::SessionClosed`]. Discovered
    /// endpoints without a connected session are opened and appended, which
    /// includes devices that return after a close or a fault.
    ///
    /// Returns the number of connected sessions.
    pub fn rescan(&mut self, filter: TransportFilter) -> Result<usize> {
        let transports = self.discovery.scan(filter)?;
        let present: HashSet<String> = transports
            .iter()
            .map(|t| t.endpoint().to_string())
            .collect();

        for session in &mut self.sessions {
            if !session.is_connected()
                || !filter.matches(session.kind())
                || present.contains(session.endpoint())
            {
                continue;
            }
            log::info!("{}: no longer present", session.endpoint());
            session.close();
        }

        let mut held: HashSet<String> = self
            .sessions
            .iter()
            .filter(|s| s.is_connected())
            .map(|s| s.endpoint().to_string())
            .collect();
        for transport in transports {
            if !held.insert(transport.endpoint().to_string()) {
                continue;
            }
            if let Some(session) = self.open_session(transport) {
                self.sessions.push(session);
            }
        }
        Ok(self.connected())
    }

    pub fn rescan_all(&mut self) -> Result<usize> {
        self.rescan(TransportFilter::Both)
    }

    pub fn rescan_only_usb(&mut self) -> Result<usize> {
        self.rescan(TransportFilter::Usb)
    }

    pub fn rescan_only_network(&mut self) -> Result<usize> {
        self.rescan(TransportFilter::Network)
    }

    fn open_session(&self, transport: Box<dyn Transport>) -> Option<DeviceSession> {
        let mut session = DeviceSession::new(transport, self.discovery.config());
        match session.open() {
            Ok(()) => Some(session),
            Err(e) => {
                log::warn!("{}: skipped: {}", session.endpoint(), e);
                None
            }
        }
    }

    /// Close and drop every session. The registry stays usable.
    pub fn close_all(&mut self) {
        for session in &mut self.sessions {
            session.close();
        }
        self.sessions.clear();
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of sessions that are Idle or Streaming.
    pub fn connected(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_connected()).count()
    }

    pub fn session(&self, index: usize) -> Result<&DeviceSession> {
        let len = self.sessions.len();
        self.sessions.get(index).ok_or(Error::NotFound { index, len })
    }

    pub fn session_mut(&mut self, index: usize) -> Result<&mut DeviceSession> {
        let len = self.sessions.len();
        self.sessions
            .get_mut(index)
            .ok_or(Error::NotFound { index, len })
    }

    /// All sessions as disjoint mutable borrows, e.g. to drive each from its
    /// own scoped thread.
    pub fn sessions_mut(&mut self) -> &mut [DeviceSession] {
        &mut self.sessions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeviceSession> {
        self.sessions.iter()
    }

    // =========================================================================
    // Index-addressed operations
    // =========================================================================

    pub fn name(&self, index: usize) -> Result<String> {
        Ok(self.session(index)?.name().to_string())
    }

    pub fn set_name(&mut self, index: usize, name: &str) -> Result<()> {
        self.session_mut(index)?.set_name(name)
    }

    pub fn is_usb(&self, index: usize) -> Result<bool> {
        Ok(self.session(index)?.is_usb())
    }

    pub fn firmware_version(&self, index: usize) -> Result<u32> {
        Ok(self.session(index)?.firmware_version())
    }

    pub fn supports_higher_resolutions(&self, index: usize) -> Result<bool> {
        Ok(self.session(index)?.supports_higher_resolutions())
    }

    pub fn is_closed(&self, index: usize) -> Result<bool> {
        Ok(self.session(index)?.is_closed())
    }

    pub fn status(&mut self, index: usize) -> Result<DeviceStatus> {
        self.session_mut(index)?.status()
    }

    pub fn stop(&mut self, index: usize) -> Result<()> {
        self.session_mut(index)?.stop()
    }

    pub fn set_shutter(&mut self, index: usize, open: bool) -> Result<()> {
        self.session_mut(index)?.set_shutter(open)
    }

    pub fn erase_firmware(&mut self, index: usize) -> Result<()> {
        self.session_mut(index)?.erase_firmware()
    }

    pub fn write_frame(
        &mut self,
        index: usize,
        pps: u32,
        flags: WriteFrameFlags,
        points: &[Point],
    ) -> Result<WriteStatus> {
        self.session_mut(index)?.write_frame(pps, flags, points)
    }

    pub fn write_frame_high_resolution(
        &mut self,
        index: usize,
        pps: u32,
        flags: WriteFrameFlags,
        points: &[PointHighRes],
    ) -> Result<WriteStatus> {
        self.session_mut(index)?
            .write_frame_high_resolution(pps, flags, points)
    }

    pub fn write_frame_extended(
        &mut self,
        index: usize,
        pps: u32,
        flags: WriteFrameFlags,
        points: &[PointExt],
    ) -> Result<WriteStatus> {
        self.session_mut(index)?.write_frame_extended(pps, flags, points)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl<'a> IntoIterator for &'a DeviceRegistry {
    type Item = &'a DeviceSession;
    type IntoIter = std::slice::Iter<'a, DeviceSession>;

    fn into_iter(self) -> Self::IntoIter {
        self.sessions.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::{status, StatusCode};
    use crate::testutils::{MockDevice, MockDiscoverer, MockFault};
    use crate::types::{SessionState, TransportKind};

    struct Fixture {
        usb: MockDiscoverer,
        net: MockDiscoverer,
        registry: DeviceRegistry,
    }

    fn fixture() -> Fixture {
        let usb = MockDiscoverer::new(TransportKind::Usb);
        let net = MockDiscoverer::new(TransportKind::Network);
        let mut registry =
            DeviceRegistry::with_discovery(DeviceDiscovery::external_only(TransportConfig::default()));
        registry.register(Box::new(usb.clone()));
        registry.register(Box::new(net.clone()));
        Fixture { usb, net, registry }
    }

    fn endpoints(registry: &DeviceRegistry) -> Vec<String> {
        registry.iter().map(|s| s.endpoint().to_string()).collect()
    }

    #[test]
    fn test_open_counts_sessions() {
        let mut fx = fixture();
        fx.usb.add(MockDevice::usb("usb:1:2"));
        fx.usb.add(MockDevice::usb("usb:1:3"));
        fx.net.add(MockDevice::network("net:10.0.0.9:7355"));

        assert_eq!(fx.registry.open_all().unwrap(), 3);
        assert_eq!(fx.registry.open_only_usb().unwrap(), 2);
        assert_eq!(fx.registry.open_only_network().unwrap(), 1);
        assert!(!fx.registry.is_usb(0).unwrap());
    }

    #[test]
    fn test_open_skips_devices_that_fail() {
        let mut fx = fixture();
        let busy = MockDevice::usb("usb:1:2");
        busy.fail_open(Some(MockFault::InUse));
        fx.usb.add(busy);
        fx.usb.add(MockDevice::usb("usb:1:3"));

        assert_eq!(fx.registry.open_all().unwrap(), 1);
        assert_eq!(endpoints(&fx.registry), vec!["usb:1:3"]);
    }

    #[test]
    fn test_open_without_transport() {
        let mut fx = fixture();
        fx.usb.set_unavailable(true);
        fx.net.set_unavailable(true);
        let result = fx.registry.open_all();
        assert!(matches!(result, Err(Error::NoTransport(_))));
        assert_eq!(result.status_code(), status::NO_TRANSPORT);
    }

    #[test]
    fn test_open_replaces_previous_sessions() {
        let mut fx = fixture();
        let device = MockDevice::usb("usb:1:2");
        fx.usb.add(device.clone());

        fx.registry.open_all().unwrap();
        fx.registry.open_all().unwrap();
        assert_eq!(fx.registry.len(), 1);
        assert_eq!(device.open_count(), 2);
        assert!(device.is_open());
    }

    #[test]
    fn test_out_of_range_index_is_not_found() {
        let mut fx = fixture();
        fx.usb.add(MockDevice::usb("usb:1:2"));
        fx.registry.open_all().unwrap();

        let err = fx.registry.name(1).unwrap_err();
        assert!(matches!(err, Error::NotFound { index: 1, len: 1 }));
        assert_eq!(err.code(), status::NOT_FOUND);
        assert!(fx.registry.stop(5).unwrap_err().is_not_found());
        assert!(fx
            .registry
            .write_frame(1, 30_000, WriteFrameFlags::empty(), &[])
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_rescan_closes_absent_in_place_and_appends_new() {
        let mut fx = fixture();
        let a = MockDevice::usb("usb:1:2");
        let b = MockDevice::usb("usb:1:3");
        fx.usb.add(a.clone());
        fx.usb.add(b.clone());
        fx.registry.open_all().unwrap();
        assert_eq!(endpoints(&fx.registry), vec!["usb:1:2", "usb:1:3"]);

        a.set_present(false);
        let c = MockDevice::network("net:10.0.0.9:7355");
        fx.net.add(c.clone());

        assert_eq!(fx.registry.rescan_all().unwrap(), 2);
        assert_eq!(
            endpoints(&fx.registry),
            vec!["usb:1:2", "usb:1:3", "net:10.0.0.9:7355"]
        );
        assert!(!a.is_open());
        assert!(fx.registry.is_closed(0).unwrap());
        assert!(!fx.registry.is_closed(1).unwrap());
        // The surviving session was kept, not reopened.
        assert_eq!(b.open_count(), 1);
        assert_eq!(c.open_count(), 1);
        assert_eq!(fx.registry.connected(), 2);
    }

    #[test]
    fn test_stale_slot_never_reaches_another_device() {
        let mut fx = fixture();
        let first = MockDevice::usb("usb:1:2").with_name("First");
        let second = MockDevice::usb("usb:1:3").with_name("Second");
        fx.usb.add(first.clone());
        fx.usb.add(second.clone());
        fx.registry.open_all().unwrap();

        first.set_present(false);
        fx.registry.rescan_all().unwrap();
        second.clear_traffic();

        let err = fx.registry.set_name(0, "Renamed").unwrap_err();
        assert!(matches!(err, Error::SessionClosed));
        assert_eq!(err.code(), status::SESSION_CLOSED);
        assert!(matches!(fx.registry.stop(0), Err(Error::SessionClosed)));
        assert!(matches!(
            fx.registry.set_shutter(0, true),
            Err(Error::SessionClosed)
        ));
        let points = [Point::new(1, 2, 3, 4, 5, 6); 4];
        assert!(matches!(
            fx.registry.write_frame(0, 30_000, WriteFrameFlags::empty(), &points),
            Err(Error::SessionClosed)
        ));

        assert!(second.commands().is_empty());
        assert!(second.frames().is_empty());
        assert_eq!(fx.registry.name(1).unwrap(), "Second");
        assert_eq!(second.name(), "Second");
    }

    #[test]
    fn test_rescan_filter_keeps_other_kinds() {
        let mut fx = fixture();
        let usb_dev = MockDevice::usb("usb:1:2");
        let net_dev = MockDevice::network("net:10.0.0.9:7355");
        fx.usb.add(usb_dev.clone());
        fx.net.add(net_dev.clone());
        fx.registry.open_all().unwrap();

        net_dev.set_present(false);
        assert_eq!(fx.registry.rescan_only_usb().unwrap(), 2);
        assert!(!fx.registry.is_closed(1).unwrap());
        assert_eq!(fx.registry.rescan_only_network().unwrap(), 1);
        assert!(fx.registry.is_closed(1).unwrap());
        assert!(!fx.registry.is_closed(0).unwrap());
        assert_eq!(fx.registry.len(), 2);
    }

    #[test]
    fn test_rescan_reopens_faulted_device_in_new_slot() {
        let mut fx = fixture();
        let device = MockDevice::usb("usb:1:2");
        fx.usb.add(device.clone());
        fx.registry.open_all().unwrap();

        device.fail_status(Some(MockFault::Disconnected));
        assert!(fx.registry.status(0).is_err());
        assert_eq!(
            fx.registry.session(0).unwrap().state(),
            SessionState::Faulted
        );

        // Reconnected: a fresh session is appended, the faulted slot stays.
        device.fail_status(None);
        assert_eq!(fx.registry.rescan_all().unwrap(), 1);
        assert!(matches!(fx.registry.status(0), Err(Error::SessionFaulted)));
        assert_eq!(fx.registry.session(1).unwrap().state(), SessionState::Idle);
        assert_eq!(device.open_count(), 2);

        // open renumbers from scratch.
        assert_eq!(fx.registry.open_all().unwrap(), 1);
        assert_eq!(fx.registry.len(), 1);
    }

    #[test]
    fn test_rescan_never_duplicates_an_endpoint() {
        let mut fx = fixture();
        fx.usb.add(MockDevice::usb("usb:1:2"));
        fx.registry.open_all().unwrap();
        fx.registry.rescan_all().unwrap();
        fx.registry.rescan_all().unwrap();
        assert_eq!(endpoints(&fx.registry), vec!["usb:1:2"]);
    }

    #[test]
    fn test_set_config_applies_to_later_opens() {
        let mut fx = fixture();
        fx.usb.add(MockDevice::usb("usb:1:2"));
        let config = TransportConfig::default()
            .with_log_level(LogLevel::Debug)
            .with_control_timeout(Duration::from_millis(5));
        fx.registry.set_config(config.clone());
        assert_eq!(fx.registry.config(), &config);
        assert_eq!(fx.registry.open_all().unwrap(), 1);
    }

    #[test]
    fn test_index_addressed_operations() {
        let mut fx = fixture();
        let device = MockDevice::usb("usb:1:2").with_firmware_version(6);
        fx.usb.add(device.clone());
        fx.registry.open_all().unwrap();

        assert_eq!(fx.registry.name(0).unwrap(), "Helios");
        fx.registry.set_name(0, "Booth").unwrap();
        assert_eq!(fx.registry.name(0).unwrap(), "Booth");
        assert!(fx.registry.is_usb(0).unwrap());
        assert_eq!(fx.registry.firmware_version(0).unwrap(), 6);
        assert!(fx.registry.supports_higher_resolutions(0).unwrap());
        assert!(!fx.registry.is_closed(0).unwrap());

        fx.registry.set_shutter(0, true).unwrap();
        let points = [PointHighRes::new(100, 100, 0xFFFF, 0xFFFF, 0xFFFF); 8];
        assert_eq!(
            fx.registry
                .write_frame_high_resolution(0, 20_000, WriteFrameFlags::empty(), &points)
                .unwrap(),
            WriteStatus::Written
        );
        assert!(fx.registry
            .write_frame_extended(0, 20_000, WriteFrameFlags::empty(), &[PointExt::default()])
            .unwrap_err()
            .is_busy());
        assert_eq!(fx.registry.status(0).unwrap(), DeviceStatus::Ready);
        fx.registry.stop(0).unwrap();
        fx.registry.erase_firmware(0).unwrap();
        assert!(fx.registry.is_closed(0).unwrap());
    }

    #[test]
    fn test_close_all_and_drop_release_devices() {
        let mut fx = fixture();
        let device = MockDevice::usb("usb:1:2");
        fx.usb.add(device.clone());

        fx.registry.open_all().unwrap();
        fx.registry.close_all();
        assert!(fx.registry.is_empty());
        assert!(!device.is_open());

        // Reusable after close_all.
        assert_eq!(fx.registry.open_all().unwrap(), 1);
        drop(fx.registry);
        assert!(!device.is_open());
    }

    #[test]
    fn test_sessions_drive_concurrently() {
        let mut fx = fixture();
        let devices: Vec<MockDevice> = (2..6)
            .map(|addr| MockDevice::usb(format!("usb:1:{addr}")))
            .collect();
        for device in &devices {
            fx.usb.add(device.clone());
        }
        fx.registry.open_all().unwrap();

        let points = vec![Point::new(2048, 2048, 255, 255, 255, 255); 64];
        std::thread::scope(|scope| {
            for session in fx.registry.sessions_mut() {
                let points = &points;
                scope.spawn(move || {
                    session
                        .write_frame(30_000, WriteFrameFlags::empty(), points)
                        .unwrap();
                });
            }
        });

        for device in &devices {
            assert_eq!(device.frames().len(), 1);
        }
    }

    #[test]
    fn test_set_log_level_reaches_config() {
        let mut fx = fixture();
        fx.registry.set_log_level(LogLevel::Warning);
        assert_eq!(fx.registry.config().log_level, LogLevel::Warning);
    }
}
