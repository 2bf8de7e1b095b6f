//! Test doubles shared by the integration tests.
//!
//! - `FakeHypervisor`: in-memory libvirt that records every call
//! - `StaticInterfaces`: fixed host interface table
//! - `MemoryReserver`: process-local reservations with flock semantics

#![allow(dead_code)]

use async_trait::async_trait;
use netctl_core::config::LifecycleSettings;
use netctl_core::error::{NetctlError, Result};
use netctl_core::hypervisor::{
    Connection, DomainObject, ErrorCode, HvResult, Hypervisor, HypervisorError, NetworkObject,
};
use netctl_core::network::{
    InterfaceAddr, InterfaceSource, NetworkManager, NetworkSpec, Reservation, ReservationHandle,
    SubnetAllocator, SubnetReserver,
};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct FakeNetwork {
    pub xml: String,
    pub active: bool,
    pub autostart: bool,
}

/// A guest with separate running and persistent definitions.
#[derive(Debug, Clone)]
pub struct FakeGuest {
    pub name: String,
    pub running: bool,
    pub live_xml: String,
    pub persistent_xml: String,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub networks: HashMap<String, FakeNetwork>,
    pub domains: Vec<FakeGuest>,
    /// Every control-plane call, e.g. "define kind-net"
    pub calls: Vec<String>,
    /// Number of upcoming network starts that fail
    pub start_failures: u32,
    /// Number of upcoming undefines that report a busy resource
    pub busy_undefines: u32,
    pub refuse_connections: bool,
    pub connections_opened: u32,
    pub connections_closed: u32,
    pub handles_opened: u32,
    pub handles_freed: u32,
}

/// In-memory hypervisor.
#[derive(Clone, Default)]
pub struct FakeHypervisor {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_network(self, name: &str, active: bool, autostart: bool) -> Self {
        self.state.lock().unwrap().networks.insert(
            name.to_string(),
            FakeNetwork { xml: format!("<network><name>{}</name></network>", name), active, autostart },
        );
        self
    }

    /// A running guest attached to `network`.
    pub fn with_domain(self, guest: &str, network: &str) -> Self {
        let xml = domain_xml(guest, Some(network));
        self.state.lock().unwrap().domains.push(FakeGuest {
            name: guest.to_string(),
            running: true,
            live_xml: xml.clone(),
            persistent_xml: xml,
        });
        self
    }

    /// A shut-off guest whose persistent definition still attaches it to `network`.
    ///
    /// Its live description carries no interfaces, so only an inactive
    /// lookup can see the attachment.
    pub fn with_shutoff_domain(self, guest: &str, network: &str) -> Self {
        self.state.lock().unwrap().domains.push(FakeGuest {
            name: guest.to_string(),
            running: false,
            live_xml: domain_xml(guest, None),
            persistent_xml: domain_xml(guest, Some(network)),
        });
        self
    }

    pub fn network(&self, name: &str) -> Option<FakeNetwork> {
        self.state.lock().unwrap().networks.get(name).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls that change network state.
    pub fn destructive_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("destroy") || c.starts_with("undefine"))
            .collect()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Every connection closed and every handle freed.
    pub fn assert_balanced(&self) {
        let state = self.state.lock().unwrap();
        assert_eq!(state.connections_opened, state.connections_closed, "connection leak");
        assert_eq!(state.handles_opened, state.handles_freed, "network handle leak");
    }
}

fn domain_xml(guest: &str, network: Option<&str>) -> String {
    let interface = network
        .map(|n| format!("<interface type='network'><source network='{}'/></interface>", n))
        .unwrap_or_default();
    format!(
        "<domain type='kvm'><name>{}</name><devices>\
         <disk type='file'><source file='/var/lib/disk.img'/></disk>{}\
         </devices></domain>",
        guest, interface
    )
}

fn hv_error(code: ErrorCode, message: impl Into<String>) -> HypervisorError {
    HypervisorError::new(code, message)
}

#[async_trait]
impl Hypervisor for FakeHypervisor {
    async fn connect(&self, uri: &str) -> HvResult<Box<dyn Connection>> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_connections {
            return Err(hv_error(
                ErrorCode::ConnectionFailed,
                format!("failed to connect to the hypervisor at {}", uri),
            ));
        }
        state.connections_opened += 1;
        Ok(Box::new(FakeConnection { state: self.state.clone() }))
    }
}

struct FakeConnection {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnection {
    fn handle(&self, name: &str) -> Box<dyn NetworkObject> {
        self.state.lock().unwrap().handles_opened += 1;
        Box::new(FakeNetworkHandle { name: name.to_string(), state: self.state.clone() })
    }
}

fn network_name(xml: &str) -> Option<String> {
    let start = xml.find("<name>")? + "<name>".len();
    let end = xml[start..].find("</name>")? + start;
    Some(xml[start..end].to_string())
}

#[async_trait]
impl Connection for FakeConnection {
    async fn close(&self) -> HvResult<()> {
        self.state.lock().unwrap().connections_closed += 1;
        Ok(())
    }

    async fn lookup_network(&self, name: &str) -> HvResult<Box<dyn NetworkObject>> {
        let exists = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("lookup {}", name));
            state.networks.contains_key(name)
        };
        if !exists {
            return Err(hv_error(
                ErrorCode::NoNetwork,
                format!("Network not found: no network with matching name '{}'", name),
            ));
        }
        Ok(self.handle(name))
    }

    async fn define_network(&self, xml: &str) -> HvResult<Box<dyn NetworkObject>> {
        let name = network_name(xml)
            .ok_or_else(|| hv_error(ErrorCode::InvalidXml, "missing network name"))?;
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("define {}", name));
            let autostart = state.networks.get(&name).map(|n| n.autostart).unwrap_or(false);
            state
                .networks
                .insert(name.clone(), FakeNetwork { xml: xml.to_string(), active: false, autostart });
        }
        Ok(self.handle(&name))
    }

    async fn list_all_domains(&self) -> HvResult<Vec<Box<dyn DomainObject>>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .domains
            .iter()
            .map(|guest| Box::new(FakeDomain(guest.clone())) as Box<dyn DomainObject>)
            .collect())
    }
}

struct FakeNetworkHandle {
    name: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeNetworkHandle {
    fn with_network<T>(
        &self,
        call: &str,
        f: impl FnOnce(&mut FakeState) -> HvResult<T>,
    ) -> HvResult<T> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{} {}", call, self.name));
        if !state.networks.contains_key(&self.name) {
            return Err(hv_error(ErrorCode::NoNetwork, format!("Network not found: {}", self.name)));
        }
        f(&mut state)
    }
}

#[async_trait]
impl NetworkObject for FakeNetworkHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&self) -> HvResult<()> {
        let name = self.name.clone();
        self.with_network("start", |state| {
            if state.start_failures > 0 {
                state.start_failures -= 1;
                return Err(hv_error(
                    ErrorCode::OperationFailed,
                    "internal error: Network is already in use by interface virbr1",
                ));
            }
            if let Some(net) = state.networks.get_mut(&name) {
                net.active = true;
            }
            Ok(())
        })
    }

    async fn destroy(&self) -> HvResult<()> {
        let name = self.name.clone();
        self.with_network("destroy", |state| {
            if let Some(net) = state.networks.get_mut(&name) {
                net.active = false;
            }
            Ok(())
        })
    }

    async fn undefine(&self) -> HvResult<()> {
        let name = self.name.clone();
        self.with_network("undefine", |state| {
            if state.busy_undefines > 0 {
                state.busy_undefines -= 1;
                return Err(hv_error(ErrorCode::ResourceBusy, "Device or resource busy"));
            }
            state.networks.remove(&name);
            Ok(())
        })
    }

    async fn is_active(&self) -> HvResult<bool> {
        let name = self.name.clone();
        self.with_network("is-active", |state| Ok(state.networks[&name].active))
    }

    async fn autostart(&self) -> HvResult<bool> {
        let name = self.name.clone();
        self.with_network("autostart", |state| Ok(state.networks[&name].autostart))
    }

    async fn set_autostart(&self, autostart: bool) -> HvResult<()> {
        let name = self.name.clone();
        self.with_network("set-autostart", |state| {
            if let Some(net) = state.networks.get_mut(&name) {
                net.autostart = autostart;
            }
            Ok(())
        })
    }

    async fn xml_desc(&self) -> HvResult<String> {
        let name = self.name.clone();
        self.with_network("dumpxml", |state| Ok(state.networks[&name].xml.clone()))
    }

    async fn free(&self) -> HvResult<()> {
        self.state.lock().unwrap().handles_freed += 1;
        Ok(())
    }
}

struct FakeDomain(FakeGuest);

#[async_trait]
impl DomainObject for FakeDomain {
    async fn name(&self) -> HvResult<String> {
        Ok(self.0.name.clone())
    }

    async fn xml_desc(&self, inactive: bool) -> HvResult<String> {
        if inactive {
            Ok(self.0.persistent_xml.clone())
        } else {
            Ok(self.0.live_xml.clone())
        }
    }
}

/// Fixed interface table.
#[derive(Clone, Default)]
pub struct StaticInterfaces(pub Vec<InterfaceAddr>);

impl InterfaceSource for StaticInterfaces {
    fn addresses(&self) -> Result<Vec<InterfaceAddr>> {
        Ok(self.0.clone())
    }
}

pub fn bridge_iface(name: &str, ip: Ipv4Addr, prefix: u8) -> InterfaceAddr {
    InterfaceAddr {
        name: name.to_string(),
        ip,
        network: ipnet::Ipv4Net::new(ip, prefix).unwrap().trunc(),
        mtu: 1500,
        mac: "52:54:00:12:34:56".to_string(),
    }
}

/// Reservations held in a shared set; a key is busy while any handle holds it.
#[derive(Clone, Default)]
pub struct MemoryReserver {
    held: Arc<Mutex<HashSet<String>>>,
}

impl MemoryReserver {
    pub fn held(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.held.lock().unwrap().iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Claim `key` as another process would.
    pub fn hold(&self, key: &str) {
        self.held.lock().unwrap().insert(key.to_string());
    }
}

struct MemoryReservation {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Reservation for MemoryReservation {
    fn release(&mut self) -> Result<()> {
        self.held.lock().unwrap().remove(&self.key);
        Ok(())
    }
}

#[async_trait]
impl SubnetReserver for MemoryReserver {
    async fn reserve(&self, key: &str, _timeout: Duration) -> Result<ReservationHandle> {
        if !self.held.lock().unwrap().insert(key.to_string()) {
            return Err(NetctlError::ReservationBusy { key: key.to_string() });
        }
        Ok(ReservationHandle::new(
            key,
            Box::new(MemoryReservation { key: key.to_string(), held: self.held.clone() }),
        ))
    }
}

/// Everything a lifecycle test needs, wired together.
pub struct Harness {
    pub hypervisor: FakeHypervisor,
    pub reserver: MemoryReserver,
    pub manager: NetworkManager,
}

impl Harness {
    pub fn new(hypervisor: FakeHypervisor) -> Self {
        Self::with_interfaces(hypervisor, Vec::new())
    }

    pub fn with_interfaces(hypervisor: FakeHypervisor, interfaces: Vec<InterfaceAddr>) -> Self {
        let reserver = MemoryReserver::default();
        let allocator =
            SubnetAllocator::new(Arc::new(StaticInterfaces(interfaces)), Arc::new(reserver.clone()));
        let settings =
            LifecycleSettings { delete_timeout: Duration::from_secs(2), ..LifecycleSettings::default() };
        let manager = NetworkManager::new(Arc::new(hypervisor.clone()), allocator, settings);
        Self { hypervisor, reserver, manager }
    }
}

pub fn spec(name: &str) -> NetworkSpec {
    NetworkSpec {
        name: name.to_string(),
        bridge: "virbr5".to_string(),
        subnet: "192.168.39.0".to_string(),
        connection_uri: "test:///default".to_string(),
    }
}
