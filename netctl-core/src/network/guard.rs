//! Usage guard: refuses to delete networks that guests still reference.
//!
//! Every defined domain is checked, including shut-off ones, using its
//! persistent (inactive) XML definition.

use crate::error::{NetctlError, Result};
use crate::hypervisor::Connection;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

/// Networks a guest's interfaces attach to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestReference {
    pub guest: String,
    pub networks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DomainXml {
    #[serde(default)]
    devices: Option<DevicesXml>,
}

#[derive(Debug, Deserialize)]
struct DevicesXml {
    #[serde(rename = "interface", default)]
    interfaces: Vec<InterfaceXml>,
}

#[derive(Debug, Deserialize)]
struct InterfaceXml {
    #[serde(default)]
    source: Option<SourceXml>,
}

#[derive(Debug, Deserialize)]
struct SourceXml {
    #[serde(rename = "@network", default)]
    network: Option<String>,
}

impl GuestReference {
    /// Parse `<devices><interface><source network='...'/>` out of a domain definition.
    pub fn from_domain_xml(guest: &str, xml: &str) -> Result<Self> {
        let domain: DomainXml = quick_xml::de::from_str(xml).map_err(|e| {
            NetctlError::GuestDefinition { guest: guest.to_string(), reason: e.to_string() }
        })?;

        let networks = domain
            .devices
            .map(|d| d.interfaces)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|i| i.source.and_then(|s| s.network))
            .collect();

        Ok(Self { guest: guest.to_string(), networks })
    }

    pub fn references(&self, network: &str) -> bool {
        self.networks.iter().any(|n| n == network)
    }
}

/// Blocks deletion of networks that are still referenced.
#[derive(Debug, Default, Clone, Copy)]
pub struct UsageGuard;

impl UsageGuard {
    /// Fail with [`NetctlError::NetworkInUse`] when any guest references `network`.
    #[instrument(skip(self, conn))]
    pub async fn check_in_use(&self, conn: &dyn Connection, network: &str) -> Result<()> {
        debug!("trying to list all domains...");
        let domains = conn.list_all_domains().await.map_err(NetctlError::hypervisor("list all domains"))?;
        debug!("listed all domains: total of {} domains", domains.len());

        if domains.is_empty() {
            warn!("list of domains is 0 length");
        }

        for domain in domains {
            let name = domain
                .name()
                .await
                .map_err(NetctlError::hypervisor("failed to get name of a domain"))?;

            let xml = domain
                .xml_desc(true)
                .await
                .map_err(NetctlError::hypervisor(format!("failed to get XML of domain '{}'", name)))?;

            let reference = GuestReference::from_domain_xml(&name, &xml)?;
            if reference.references(network) {
                debug!("domain {} DOES use network {}, aborting...", name, network);
                metrics::counter!("netctl_network_delete_blocked_total").increment(1);
                return Err(NetctlError::NetworkInUse {
                    network: network.to_string(),
                    guest: name,
                });
            }
            debug!("domain {} does not use network {}", name, network);
        }

        Ok(())
    }
}
