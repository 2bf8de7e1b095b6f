//! libvirt network definitions.

use super::subnet::SubnetParameters;
use crate::error::{NetctlError, Result};
use quick_xml::se::{QuoteLevel, Serializer};
use serde::Serialize;

/// Declarative description of a network to define.
#[derive(Debug, Clone, Copy)]
pub struct NetworkIntent<'a> {
    pub name: &'a str,
    pub bridge: &'a str,
    /// Without a subnet the definition carries no `<ip>` block
    pub subnet: Option<&'a SubnetParameters>,
}

#[derive(Serialize)]
#[serde(rename = "network")]
struct NetworkXml<'a> {
    name: &'a str,
    dns: DnsXml,
    bridge: BridgeXml<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<IpXml>,
}

#[derive(Serialize)]
struct DnsXml {
    #[serde(rename = "@enable")]
    enable: &'static str,
}

#[derive(Serialize)]
struct BridgeXml<'a> {
    #[serde(rename = "@name")]
    name: &'a str,
    #[serde(rename = "@stp")]
    stp: &'static str,
    #[serde(rename = "@delay")]
    delay: u32,
}

#[derive(Serialize)]
struct IpXml {
    #[serde(rename = "@address")]
    address: String,
    #[serde(rename = "@netmask")]
    netmask: String,
    dhcp: DhcpXml,
}

#[derive(Serialize)]
struct DhcpXml {
    range: RangeXml,
}

#[derive(Serialize)]
struct RangeXml {
    #[serde(rename = "@start")]
    start: String,
    #[serde(rename = "@end")]
    end: String,
}

impl<'a> NetworkIntent<'a> {
    pub fn new(name: &'a str, bridge: &'a str, subnet: Option<&'a SubnetParameters>) -> Self {
        Self { name, bridge, subnet }
    }

    fn model(&self) -> NetworkXml<'a> {
        NetworkXml {
            name: self.name,
            dns: DnsXml { enable: "no" },
            bridge: BridgeXml { name: self.bridge, stp: "on", delay: 0 },
            ip: self.subnet.map(|subnet| IpXml {
                address: subnet.gateway.to_string(),
                netmask: subnet.netmask.to_string(),
                dhcp: DhcpXml {
                    range: RangeXml {
                        start: subnet.client_min.to_string(),
                        end: subnet.client_max.to_string(),
                    },
                },
            }),
        }
    }

    /// Render the libvirt network XML.
    pub fn to_xml(&self) -> Result<String> {
        let mut xml = String::new();
        let mut ser = Serializer::new(&mut xml);
        ser.indent(' ', 2);
        ser.set_quote_level(QuoteLevel::Full);
        self.model().serialize(ser).map_err(|e| NetctlError::NetworkDefinition {
            name: self.name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(xml)
    }
}
