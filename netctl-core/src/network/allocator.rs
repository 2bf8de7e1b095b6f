//! Free private subnet discovery.
//!
//! Walks candidate subnets from a seed address and reserves the first one
//! that is private, not present on a local interface and not reserved by a
//! cooperating process. Allocation is optimistic: a busy candidate is
//! skipped, never waited for.

use super::interfaces::InterfaceSource;
use super::lock::SubnetReserver;
use super::subnet::{AddressInspector, SubnetParameters};
use crate::error::{NetctlError, Result};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Reservation wait while probing candidates: practically just a check.
pub const DEFAULT_RESERVATION_TIMEOUT: Duration = Duration::from_millis(1);

/// Subnet allocator.
///
/// Interface state and reservations come from injected sources, so two
/// allocators sharing a reserver behave like two processes on one host.
#[derive(Clone)]
pub struct SubnetAllocator {
    inspector: AddressInspector,
    interfaces: Arc<dyn InterfaceSource>,
    reserver: Arc<dyn SubnetReserver>,
    reservation_timeout: Duration,
}

impl SubnetAllocator {
    pub fn new(interfaces: Arc<dyn InterfaceSource>, reserver: Arc<dyn SubnetReserver>) -> Self {
        Self {
            inspector: AddressInspector::new(interfaces.clone()),
            interfaces,
            reserver,
            reservation_timeout: DEFAULT_RESERVATION_TIMEOUT,
        }
    }

    pub fn with_reservation_timeout(mut self, timeout: Duration) -> Self {
        self.reservation_timeout = timeout;
        self
    }

    pub fn inspector(&self) -> &AddressInspector {
        &self.inspector
    }

    /// Find and reserve a free private subnet, starting at `start` and
    /// stepping by `step` up to `tries` candidates.
    ///
    /// The returned parameters own the reservation.
    ///
    /// # Errors
    ///
    /// Returns `NetctlError::NoFreeSubnet` when every candidate was rejected
    /// or the walk ran past the end of the address space.
    #[instrument(skip(self))]
    pub async fn find_free_subnet(&self, start: &str, step: u8, tries: u32) -> Result<SubnetParameters> {
        let mut candidate = start.to_string();
        for _ in 0..tries {
            let mut subnet = self.inspector.inspect(&candidate)?;

            if !subnet.is_private {
                info!("skipping subnet {} that is not private", subnet.cidr);
            } else if !subnet.has_client_range() {
                info!("skipping subnet {} that is too small for clients", subnet.cidr);
            } else if self.is_taken(subnet.ip)? {
                info!("skipping subnet {} that is taken: {:?}", subnet.cidr, subnet);
            } else {
                let key = subnet.ip.to_string();
                match self.reserver.reserve(&key, self.reservation_timeout).await {
                    Ok(reservation) => {
                        subnet.attach_reservation(reservation);
                        info!("using free subnet {}: {:?}", subnet.cidr, subnet);
                        metrics::counter!("netctl_subnet_allocations_total", "status" => "success")
                            .increment(1);
                        return Ok(subnet);
                    }
                    Err(NetctlError::ReservationBusy { .. }) => {
                        info!("skipping subnet {} that is reserved: {:?}", subnet.cidr, subnet);
                    }
                    Err(e) => return Err(e),
                }
            }

            match next_candidate(subnet.cidr, step) {
                Some(next) => candidate = next.to_string(),
                None => {
                    info!("stepping past {} leaves the address space", subnet.cidr);
                    break;
                }
            }
        }

        metrics::counter!("netctl_subnet_allocations_total", "status" => "exhausted").increment(1);
        Err(NetctlError::NoFreeSubnet { start: start.to_string(), step, tries })
    }

    /// Whether a local interface network contains `network`.
    fn is_taken(&self, network: Ipv4Addr) -> Result<bool> {
        Ok(self.interfaces.addresses()?.iter().any(|iface| iface.network.contains(&network)))
    }
}

/// Step `current` by `step` in the second octet for /16 and larger networks,
/// the third octet otherwise. `None` when the octet would pass 255.
pub fn next_candidate(current: Ipv4Net, step: u8) -> Option<Ipv4Net> {
    let mut octets = current.network().octets();
    let idx = if current.prefix_len() <= 16 { 1 } else { 2 };
    octets[idx] = octets[idx].checked_add(step)?;
    Ipv4Net::new(Ipv4Addr::from(octets), current.prefix_len()).ok().map(|n| n.trunc())
}
