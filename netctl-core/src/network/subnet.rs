//! Subnet parameters and the Address Inspector.
//!
//! [`AddressInspector::inspect`] turns a bare address, a network address or a
//! CIDR string into full [`SubnetParameters`]. When the address already lives
//! on a local interface, the interface's network and address win over the
//! naive interpretation of the input.

use super::interfaces::{InterfaceAddr, InterfaceSource};
use super::lock::ReservationHandle;
use crate::error::{NetctlError, Result};
use ipnet::Ipv4Net;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

/// Local interface a subnet is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundInterface {
    pub name: String,
    pub ipv4: Ipv4Addr,
    pub mtu: u32,
    pub mac: String,
}

/// Parameters of one IPv4 subnet.
#[derive(Debug, Serialize)]
pub struct SubnetParameters {
    /// Network address
    pub ip: Ipv4Addr,
    /// Network mask (e.g., 255.255.255.0)
    pub netmask: Ipv4Addr,
    /// Prefix length
    pub prefix: u8,
    /// CIDR form (e.g., 192.168.39.0/24)
    pub cidr: Ipv4Net,
    /// Interface address, or the first address of the network
    pub gateway: Ipv4Addr,
    /// First client address after the gateway
    pub client_min: Ipv4Addr,
    /// Last client address before the broadcast
    pub client_max: Ipv4Addr,
    /// Last address of the network
    pub broadcast: Ipv4Addr,
    /// RFC1918 private range
    pub is_private: bool,
    /// Set when the network belongs to a live local interface
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<BoundInterface>,
    #[serde(skip)]
    reservation: Option<ReservationHandle>,
}

impl SubnetParameters {
    /// Derive the parameters of `network`.
    ///
    /// `gateway` overrides the default first address (used when the network
    /// comes from a local interface).
    pub fn from_network(network: Ipv4Net, gateway: Option<Ipv4Addr>) -> Self {
        let network = network.trunc();
        let network_ip = u32::from(network.network());
        let mask = u32::from(network.netmask());
        let broadcast = (network_ip & mask) | !mask;
        let gateway = gateway.map(u32::from).unwrap_or_else(|| network_ip.saturating_add(1));

        Self {
            ip: network.network(),
            netmask: network.netmask(),
            prefix: network.prefix_len(),
            cidr: network,
            gateway: Ipv4Addr::from(gateway),
            client_min: Ipv4Addr::from(gateway.saturating_add(1)),
            client_max: Ipv4Addr::from(broadcast.saturating_sub(1)),
            broadcast: Ipv4Addr::from(broadcast),
            is_private: network.network().is_private(),
            interface: None,
            reservation: None,
        }
    }

    /// Whether at least two client addresses fit between gateway and broadcast.
    pub fn has_client_range(&self) -> bool {
        self.client_min < self.client_max && self.client_max < self.broadcast
    }

    /// Take the topmost client address out of the DHCP range for a
    /// load-balancer VIP and return it.
    pub fn reserve_vip(&mut self) -> Ipv4Addr {
        let vip = self.client_max;
        self.client_max = Ipv4Addr::from(u32::from(vip).saturating_sub(1));
        vip
    }

    pub fn attach_reservation(&mut self, reservation: ReservationHandle) {
        self.reservation = Some(reservation);
    }

    pub fn reservation(&self) -> Option<&ReservationHandle> {
        self.reservation.as_ref()
    }

    /// Hand the reservation to the caller, leaving the parameters unreserved.
    pub fn take_reservation(&mut self) -> Option<ReservationHandle> {
        self.reservation.take()
    }
}

/// Classful default prefix of `ip`, `None` for multicast and reserved space.
pub fn default_prefix(ip: Ipv4Addr) -> Option<u8> {
    match ip.octets()[0] {
        0..=127 => Some(8),
        128..=191 => Some(16),
        192..=223 => Some(24),
        _ => None,
    }
}

/// Parse CIDR notation first, then a bare address with its classful mask.
///
/// Returns the address as written and the network it implies.
pub fn parse_addr(addr: &str) -> Result<(Ipv4Addr, Ipv4Net)> {
    let invalid = |reason: String| NetctlError::InvalidAddress { addr: addr.to_string(), reason };
    let trimmed = addr.trim();

    if let Ok(net) = trimmed.parse::<Ipv4Net>() {
        return Ok((net.addr(), net.trunc()));
    }

    let ip: Ipv4Addr =
        trimmed.parse().map_err(|_| invalid("not an IPv4 address or CIDR".to_string()))?;
    let prefix = default_prefix(ip).ok_or_else(|| invalid("address has no default mask".to_string()))?;
    let net = Ipv4Net::new(ip, prefix).map_err(|e| invalid(e.to_string()))?;
    Ok((ip, net.trunc()))
}

/// Derives subnet parameters from addresses and live interface state.
#[derive(Clone)]
pub struct AddressInspector {
    interfaces: Arc<dyn InterfaceSource>,
}

impl AddressInspector {
    pub fn new(interfaces: Arc<dyn InterfaceSource>) -> Self {
        Self { interfaces }
    }

    /// Inspect `addr` (e.g. "192.168.17.42", "192.168.17.0" or "192.168.17.42/24").
    pub fn inspect(&self, addr: &str) -> Result<SubnetParameters> {
        let (ip, network) = parse_addr(addr)?;

        let params = match self.lookup(ip)? {
            Some(iface) => {
                let mut params = SubnetParameters::from_network(iface.network, Some(iface.ip));
                params.interface = Some(BoundInterface {
                    name: iface.name,
                    ipv4: iface.ip,
                    mtu: iface.mtu,
                    mac: iface.mac,
                });
                params
            }
            None => SubnetParameters::from_network(network, None),
        };

        debug!("inspected {}: {:?}", addr, params);
        Ok(params)
    }

    /// Interface whose network contains `ip`.
    fn lookup(&self, ip: Ipv4Addr) -> Result<Option<InterfaceAddr>> {
        Ok(self.interfaces.addresses()?.into_iter().find(|iface| iface.network.contains(&ip)))
    }
}
