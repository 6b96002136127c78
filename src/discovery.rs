//! Device discovery.
//!
//! [`DeviceDiscovery`] runs every discoverer whose transport kind passes the
//! requested filter and returns unopened transports, one per endpoint. The
//! built-in USB and network discoverers are added according to the enabled
//! features; further discoverers can be registered, which is how tests plug in
//! in-memory devices.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportConfig, TransportError};
use crate::types::{LogLevel, TransportFilter, TransportKind};

#[cfg(feature = "network")]
use crate::protocols::helios::NetDiscovery;
#[cfg(feature = "usb")]
use crate::protocols::helios::UsbDiscovery;

// =============================================================================
// Discoverer Trait
// =============================================================================

/// Source of transports for one kind of medium.
///
/// # Example
///
/// ```ignore
/// use helios_dac::{Discoverer, DeviceDiscovery, Transport, TransportConfig,
///     TransportError, TransportKind};
///
/// struct SerialBridge;
///
/// impl Discoverer for SerialBridge {
///     fn kind(&self) -> TransportKind {
///         TransportKind::Usb
///     }
///
///     fn scan(&mut self, config: &TransportConfig)
///         -> Result<Vec<Box<dyn Transport>>, TransportError>
///     {
///         Ok(vec![])
///     }
/// }
///
/// let mut discovery = DeviceDiscovery::new(TransportConfig::default());
/// discovery.register(Box::new(SerialBridge));
/// ```
pub trait Discoverer: Send {
    /// The medium this discoverer searches.
    fn kind(&self) -> TransportKind;

    /// Enumerate reachable devices without claiming them.
    ///
    /// `TransportError::Unavailable` means the subsystem itself is missing
    /// (no libusb, no socket); any other error is a failed pass.
    fn scan(
        &mut self,
        config: &TransportConfig,
    ) -> std::result::Result<Vec<Box<dyn Transport>>, TransportError>;
}

// =============================================================================
// Discovery Coordinator
// =============================================================================

/// Discovery coordinator across all transports.
pub struct DeviceDiscovery {
    config: TransportConfig,
    discoverers: Vec<Box<dyn Discoverer>>,
}

impl DeviceDiscovery {
    /// Create a coordinator with the built-in discoverers for every enabled
    /// transport feature.
    pub fn new(config: TransportConfig) -> Self {
        #[allow(unused_mut)]
        let mut discoverers: Vec<Box<dyn Discoverer>> = Vec::new();
        #[cfg(feature = "usb")]
        discoverers.push(Box::new(UsbDiscovery::new()));
        #[cfg(feature = "network")]
        discoverers.push(Box::new(NetDiscovery::new()));
        Self {
            config,
            discoverers,
        }
    }

    /// Create a coordinator with no built-in discoverers.
    pub fn external_only(config: TransportConfig) -> Self {
        Self {
            config,
            discoverers: Vec::new(),
        }
    }

    /// Add a discoverer. It runs after those already present.
    pub fn register(&mut self, discoverer: Box<dyn Discoverer>) {
        self.discoverers.push(discoverer);
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Replace the configuration used for subsequent scans.
    pub fn set_config(&mut self, config: TransportConfig) {
        self.config = config;
    }

    pub fn set_log_level(&mut self, level: LogLevel) {
        self.config.log_level = level;
    }

    /// Scan every discoverer matching `filter`.
    ///
    /// Returns [`Error::NoTransport`] when no matching discoverer could run.
    /// A discoverer that fails while others succeed is logged and skipped.
    /// The first transport seen for an endpoint wins.
    pub fn scan(&mut self, filter: TransportFilter) -> Result<Vec<Box<dyn Transport>>> {
        let mut attempted = 0;
        let mut succeeded = 0;
        let mut failures = Vec::new();
        let mut seen = HashSet::new();
        let mut transports = Vec::new();

        for discoverer in self
            .discoverers
            .iter_mut()
            .filter(|d| filter.matches(d.kind()))
        {
            attempted += 1;
            let kind = discoverer.kind();
            match discoverer.scan(&self.config) {
                Ok(found) => {
                    succeeded += 1;
                    log::debug!("{} discovery found {} device(s)", kind, found.len());
                    for transport in found {
                        if seen.insert(transport.endpoint().to_string()) {
                            transports.push(transport);
                        }
                    }
                }
                Err(e) => {
                    log::warn!("{} discovery failed: {}", kind, e);
                    failures.push(format!("{kind}: {e}"));
                }
            }
        }

        if succeeded == 0 {
            return Err(if attempted == 0 {
                Error::no_transport(format!("no discoverer for {:?}", filter))
            } else {
                Error::no_transport(failures.join("; "))
            });
        }
        Ok(transports)
    }
}

impl Default for DeviceDiscovery {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{MockDevice, MockDiscoverer};

    #[test]
    fn test_scan_filters_by_kind() {
        let usb = MockDiscoverer::new(TransportKind::Usb);
        usb.add(MockDevice::usb("usb:1:2"));
        let net = MockDiscoverer::new(TransportKind::Network);
        net.add(MockDevice::network("net:10.0.0.5:7355"));

        let mut discovery = DeviceDiscovery::external_only(TransportConfig::default());
        discovery.register(Box::new(usb));
        discovery.register(Box::new(net));

        let endpoints = |found: Vec<Box<dyn Transport>>| -> Vec<String> {
            found.iter().map(|t| t.endpoint().to_string()).collect()
        };
        assert_eq!(
            endpoints(discovery.scan(TransportFilter::Both).unwrap()),
            vec!["usb:1:2", "net:10.0.0.5:7355"]
        );
        assert_eq!(
            endpoints(discovery.scan(TransportFilter::Usb).unwrap()),
            vec!["usb:1:2"]
        );
        assert_eq!(
            endpoints(discovery.scan(TransportFilter::Network).unwrap()),
            vec!["net:10.0.0.5:7355"]
        );
    }

    #[test]
    fn test_scan_deduplicates_endpoints() {
        let first = MockDiscoverer::new(TransportKind::Network);
        first.add(MockDevice::network("net:10.0.0.5:7355"));
        let second = MockDiscoverer::new(TransportKind::Network);
        second.add(MockDevice::network("net:10.0.0.5:7355"));

        let mut discovery = DeviceDiscovery::external_only(TransportConfig::default());
        discovery.register(Box::new(first));
        discovery.register(Box::new(second));
        assert_eq!(discovery.scan(TransportFilter::Both).unwrap().len(), 1);
    }

    #[test]
    fn test_no_transport_when_all_unavailable() {
        let usb = MockDiscoverer::new(TransportKind::Usb);
        usb.set_unavailable(true);
        let mut discovery = DeviceDiscovery::external_only(TransportConfig::default());
        discovery.register(Box::new(usb.clone()));

        let err = discovery.scan(TransportFilter::Both).err().unwrap();
        assert!(matches!(err, Error::NoTransport(_)));

        // Nothing registered for the network filter.
        assert!(matches!(
            discovery.scan(TransportFilter::Network),
            Err(Error::NoTransport(_))
        ));

        usb.set_unavailable(false);
        assert!(discovery.scan(TransportFilter::Both).unwrap().is_empty());
    }

    #[test]
    fn test_partial_failure_is_tolerated() {
        let usb = MockDiscoverer::new(TransportKind::Usb);
        usb.set_unavailable(true);
        let net = MockDiscoverer::new(TransportKind::Network);
        net.add(MockDevice::network("net:10.0.0.5:7355"));

        let mut discovery = DeviceDiscovery::external_only(TransportConfig::default());
        discovery.register(Box::new(usb));
        discovery.register(Box::new(net));
        assert_eq!(discovery.scan(TransportFilter::Both).unwrap().len(), 1);
    }

    #[test]
    fn test_set_log_level_updates_config() {
        let mut discovery = DeviceDiscovery::external_only(TransportConfig::default());
        discovery.set_log_level(LogLevel::Debug);
        assert_eq!(discovery.config().log_level, LogLevel::Debug);
    }
}
