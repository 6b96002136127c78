//! Local interface enumeration for network discovery.
//!
//! Discovery probes go to every subnet-directed broadcast address plus the
//! limited broadcast address.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// A local IPv4 network interface with its IP address and subnet mask.
#[derive(Debug, Clone)]
pub struct NetworkInterface {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl NetworkInterface {
    /// Compute the subnet-directed broadcast address (ip | !mask).
    pub fn broadcast_address(&self) -> Ipv4Addr {
        let ip = u32::from(self.ip);
        let mask = u32::from(self.netmask);
        Ipv4Addr::from(ip | !mask)
    }
}

/// Enumerate all local IPv4 network interfaces, excluding loopback.
///
/// Returns an empty vec on unsupported platforms (Windows).
pub fn get_local_interfaces() -> io::Result<Vec<NetworkInterface>> {
    get_local_interfaces_impl()
}

/// Broadcast destinations for a discovery probe on `port`.
///
/// One entry per distinct subnet broadcast address, followed by
/// 255.255.255.255. Interface enumeration failures fall back to the limited
/// broadcast address alone.
pub fn broadcast_targets(port: u16) -> Vec<SocketAddr> {
    let interfaces = match get_local_interfaces() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            log::debug!("interface enumeration failed: {}", e);
            Vec::new()
        }
    };
    targets_for(&interfaces, port)
}

fn targets_for(interfaces: &[NetworkInterface], port: u16) -> Vec<SocketAddr> {
    let mut targets: Vec<SocketAddr> = Vec::with_capacity(interfaces.len() + 1);
    let limited = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port));
    for iface in interfaces {
        let addr = SocketAddr::V4(SocketAddrV4::new(iface.broadcast_address(), port));
        if addr != limited && !targets.contains(&addr) {
            targets.push(addr);
        }
    }
    targets.push(limited);
    targets
}

/// Reads an IPv4 address out of a `sockaddr`, if it is one.
///
/// # Safety
///
/// `addr` must be null or point to a valid `sockaddr`.
#[cfg(unix)]
unsafe fn ipv4_of(addr: *const libc::sockaddr) -> Option<Ipv4Addr> {
    if addr.is_null() || i32::from((*addr).sa_family) != libc::AF_INET {
        return None;
    }
    Some(netmask_of(addr))
}

/// Reads the address bytes of a netmask `sockaddr`. Some platforms leave its
/// family unset, so it is not checked.
///
/// # Safety
///
/// `addr` must point to a valid `sockaddr_in`.
#[cfg(unix)]
unsafe fn netmask_of(addr: *const libc::sockaddr) -> Ipv4Addr {
    let sin = addr as *const libc::sockaddr_in;
    Ipv4Addr::from((*sin).sin_addr.s_addr.to_ne_bytes())
}

#[cfg(unix)]
fn get_local_interfaces_impl() -> io::Result<Vec<NetworkInterface>> {
    let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: getifaddrs fills the list head; it is freed below.
    if unsafe { libc::getifaddrs(&mut ifaddrs) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut interfaces = Vec::new();
    let mut current = ifaddrs;
    while !current.is_null() {
        // SAFETY: every node in the list stays valid until freeifaddrs.
        let ifa = unsafe { &*current };
        current = ifa.ifa_next;

        if ifa.ifa_netmask.is_null() {
            continue;
        }
        let Some(ip) = (unsafe { ipv4_of(ifa.ifa_addr) }) else {
            continue;
        };
        if !ip.is_loopback() {
            let netmask = unsafe { netmask_of(ifa.ifa_netmask) };
            interfaces.push(NetworkInterface { ip, netmask });
        }
    }

    // SAFETY: the list came from getifaddrs and is not used afterwards.
    unsafe { libc::freeifaddrs(ifaddrs) };
    Ok(interfaces)
}

#[cfg(windows)]
fn get_local_interfaces_impl() -> io::Result<Vec<NetworkInterface>> {
    // TODO: enumerate adapters with GetAdaptersAddresses.
    Ok(vec![])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_address_slash_24() {
        let iface = NetworkInterface {
            ip: Ipv4Addr::new(192, 168, 1, 100),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        };
        assert_eq!(iface.broadcast_address(), Ipv4Addr::new(192, 168, 1, 255));
    }

    #[test]
    fn test_targets_deduplicate_subnets() {
        let interfaces = [
            NetworkInterface {
                ip: Ipv4Addr::new(192, 168, 1, 10),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
            },
            NetworkInterface {
                ip: Ipv4Addr::new(192, 168, 1, 11),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
            },
            NetworkInterface {
                ip: Ipv4Addr::new(10, 0, 0, 2),
                netmask: Ipv4Addr::new(255, 0, 0, 0),
            },
        ];
        let targets = targets_for(&interfaces, 7355);
        assert_eq!(
            targets,
            vec![
                "192.168.1.255:7355".parse::<SocketAddr>().unwrap(),
                "10.255.255.255:7355".parse().unwrap(),
                "255.255.255.255:7355".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn test_targets_without_interfaces() {
        let targets = targets_for(&[], 9000);
        assert_eq!(targets, vec!["255.255.255.255:9000".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_broadcast_address_slash_30() {
        let iface = NetworkInterface {
            ip: Ipv4Addr::new(172, 16, 0, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 252),
        };
        assert_eq!(iface.broadcast_address(), Ipv4Addr::new(172, 16, 0, 3));
    }
}
