//! Registry lifecycle through the public API with in-memory devices.

#![cfg(feature = "testutils")]

use helios_dac::testutils::{MockDevice, MockDiscoverer, MockFault};
use helios_dac::{
    status, DeviceDiscovery, DeviceRegistry, DeviceStatus, Error, Point, PointHighRes,
    SessionState, StatusCode, TransportConfig, TransportKind, WriteFrameFlags,
};

fn registry_with(usb: &MockDiscoverer, net: &MockDiscoverer) -> DeviceRegistry {
    let mut discovery = DeviceDiscovery::external_only(TransportConfig::default());
    discovery.register(Box::new(usb.clone()));
    discovery.register(Box::new(net.clone()));
    DeviceRegistry::with_discovery(discovery)
}

fn line(count: u16) -> Vec<Point> {
    (0..count)
        .map(|i| Point::new(i * 4, 2048, 255, 255, 255, 255))
        .collect()
}

#[test]
fn test_hotplug_cycle() {
    let usb = MockDiscoverer::new(TransportKind::Usb);
    let net = MockDiscoverer::new(TransportKind::Network);
    let old_usb = MockDevice::usb("usb:1:4").with_firmware_version(5);
    let laser = MockDevice::network("net:10.0.0.7:7355").with_name("Truss");
    usb.add(old_usb.clone());
    net.add(laser.clone());

    let mut registry = registry_with(&usb, &net);
    assert_eq!(registry.open_all().status_code(), 2);

    // Old USB firmware only takes standard points.
    assert!(!registry.supports_higher_resolutions(0).unwrap());
    let wide = [PointHighRes::new(0, 0, 0xFFFF, 0xFFFF, 0xFFFF)];
    let rejected = registry.write_frame_high_resolution(0, 1000, WriteFrameFlags::empty(), &wide);
    assert_eq!(rejected.status_code(), status::UNSUPPORTED_FORMAT);
    assert_eq!(
        registry
            .write_frame_high_resolution(1, 1000, WriteFrameFlags::empty(), &wide)
            .status_code(),
        status::SUCCESS
    );

    // The USB device is unplugged and a new network device appears.
    old_usb.set_present(false);
    let spare = MockDevice::network("net:10.0.0.8:7355").with_name("Spare");
    net.add(spare.clone());

    assert_eq!(registry.rescan_all().unwrap(), 2);
    let names: Vec<&str> = registry.iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["Helios", "Truss", "Spare"]);
    assert!(registry.is_closed(0).unwrap());
    assert!(!old_usb.is_open());
    assert!(spare.is_open());

    // The Truss session kept its index and streaming state across the rescan.
    assert_eq!(
        registry.session(1).unwrap().state(),
        SessionState::Streaming
    );

    registry.close_all();
    assert!(registry.is_empty());
    assert!(!laser.is_open());
    assert!(!spare.is_open());
}

#[test]
fn test_frame_pacing_with_status_polls() {
    let usb = MockDiscoverer::new(TransportKind::Usb);
    let net = MockDiscoverer::new(TransportKind::Network);
    let device = MockDevice::usb("usb:2:9");
    usb.add(device.clone());

    let mut registry = registry_with(&usb, &net);
    registry.open_only_usb().unwrap();

    let frame = line(500);
    let mut written = 0;
    for tick in 0..12 {
        // The device finishes every third poll.
        device.set_status(if tick % 3 == 2 {
            DeviceStatus::Ready
        } else {
            DeviceStatus::Busy
        });
        if registry.status(0).unwrap() != DeviceStatus::Ready && written > 0 {
            assert!(registry
                .write_frame(0, 25_000, WriteFrameFlags::empty(), &frame)
                .unwrap_err()
                .is_busy());
            continue;
        }
        registry
            .write_frame(0, 25_000, WriteFrameFlags::empty(), &frame)
            .unwrap();
        written += 1;
    }
    assert_eq!(device.frames().len(), written);
    assert_eq!(written, 5);
}

#[test]
fn test_faulted_device_is_replaced_on_rescan() {
    let usb = MockDiscoverer::new(TransportKind::Usb);
    let net = MockDiscoverer::new(TransportKind::Network);
    let device = MockDevice::usb("usb:3:1");
    usb.add(device.clone());

    let mut registry = registry_with(&usb, &net);
    registry.open_only_usb().unwrap();

    device.fail_frames(Some(MockFault::Disconnected));
    let result = registry.write_frame(0, 20_000, WriteFrameFlags::empty(), &line(10));
    assert!(matches!(result, Err(Error::Transport(_))));
    assert_eq!(
        registry.write_frame(0, 20_000, WriteFrameFlags::empty(), &line(10)).status_code(),
        status::SESSION_FAULTED
    );

    device.fail_frames(None);
    assert_eq!(registry.rescan_only_usb().unwrap(), 1);
    assert_eq!(registry.session(0).unwrap().state(), SessionState::Faulted);
    assert_eq!(registry.session(1).unwrap().state(), SessionState::Idle);
    assert_eq!(device.open_count(), 2);
    assert_eq!(
        registry
            .write_frame(1, 20_000, WriteFrameFlags::empty(), &line(10))
            .status_code(),
        status::SUCCESS
    );
}

#[test]
fn test_stale_index_is_not_redirected() {
    let usb = MockDiscoverer::new(TransportKind::Usb);
    let net = MockDiscoverer::new(TransportKind::Network);
    let first = MockDevice::usb("usb:1:1").with_name("First");
    let second = MockDevice::usb("usb:1:2").with_name("Second");
    usb.add(first.clone());
    usb.add(second.clone());

    let mut registry = registry_with(&usb, &net);
    assert_eq!(registry.open_all().unwrap(), 2);

    first.set_present(false);
    let third = MockDevice::usb("usb:1:3").with_name("Third");
    usb.add(third.clone());
    assert_eq!(registry.rescan_all().unwrap(), 2);
    assert_eq!(registry.len(), 3);

    // Index 0 still means the unplugged device.
    assert!(registry.is_closed(0).unwrap());
    assert_eq!(
        registry.set_name(0, "Renamed").status_code(),
        status::SESSION_CLOSED
    );
    assert_eq!(
        registry
            .write_frame(0, 20_000, WriteFrameFlags::empty(), &line(10))
            .status_code(),
        status::SESSION_CLOSED
    );
    assert_eq!(second.name(), "Second");
    assert_eq!(third.name(), "Third");
    assert!(second.frames().is_empty());
    assert!(third.frames().is_empty());

    assert_eq!(registry.name(1).unwrap(), "Second");
    assert_eq!(registry.name(2).unwrap(), "Third");
    assert_eq!(registry.name(3).unwrap_err().code(), status::NOT_FOUND);

    // Only a full open renumbers.
    assert_eq!(registry.open_all().unwrap(), 2);
    assert_eq!(registry.name(0).unwrap(), "Second");
}
