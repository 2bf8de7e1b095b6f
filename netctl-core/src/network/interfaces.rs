//! Live host network interfaces.
//!
//! The Address Inspector and the Subnet Allocator read interface state through
//! [`InterfaceSource`] so tests can substitute a fixed interface table.

use crate::error::{NetctlError, Result};
use ipnet::Ipv4Net;
use pnet::datalink;
use pnet::ipnetwork::IpNetwork;
use std::net::Ipv4Addr;
use tracing::debug;

/// One IPv4 address assigned to a local interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddr {
    /// Interface name (e.g., "virbr0")
    pub name: String,
    /// Address assigned to the interface
    pub ip: Ipv4Addr,
    /// Network the address belongs to
    pub network: Ipv4Net,
    /// MTU, 0 when unknown
    pub mtu: u32,
    /// Hardware address, empty when the interface has none
    pub mac: String,
}

/// Source of live interface addresses.
pub trait InterfaceSource: Send + Sync {
    /// All IPv4 addresses currently assigned on the host.
    fn addresses(&self) -> Result<Vec<InterfaceAddr>>;
}

/// Reads interfaces from the running kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostInterfaces;

impl InterfaceSource for HostInterfaces {
    fn addresses(&self) -> Result<Vec<InterfaceAddr>> {
        let mut addrs = Vec::new();
        for iface in datalink::interfaces() {
            let mtu = read_mtu(&iface.name);
            let mac = iface.mac.map(|m| m.to_string()).unwrap_or_default();
            for ip in &iface.ips {
                let IpNetwork::V4(net) = ip else { continue };
                let network = Ipv4Net::new(net.ip(), net.prefix())
                    .map_err(|e| NetctlError::InterfaceLookup {
                        reason: format!("address {} on {}: {}", net, iface.name, e),
                    })?
                    .trunc();
                addrs.push(InterfaceAddr {
                    name: iface.name.clone(),
                    ip: net.ip(),
                    network,
                    mtu,
                    mac: mac.clone(),
                });
            }
        }
        debug!("found {} local IPv4 interface addresses", addrs.len());
        Ok(addrs)
    }
}

/// Read the interface MTU from sysfs.
fn read_mtu(name: &str) -> u32 {
    std::fs::read_to_string(format!("/sys/class/net/{}/mtu", name))
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}
