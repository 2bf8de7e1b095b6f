//! Network lifecycle: ensure, create and delete named virtual networks.
//!
//! A network moves between three states: absent, defined but inactive, and
//! active. Every operation opens its own connection and closes it on every
//! path; network handles never outlive the operation that looked them up.

use super::allocator::SubnetAllocator;
use super::guard::UsageGuard;
use super::interfaces::HostInterfaces;
use super::lock::HostReservationLock;
use super::retry::{retry, RetryPolicy};
use super::subnet::SubnetParameters;
use super::template::NetworkIntent;
use crate::config::{Config, LifecycleSettings};
use crate::error::{NetctlError, Result};
use crate::hypervisor::{Connection, Hypervisor, NetworkObject};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// What the operator asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub name: String,
    pub bridge: String,
    /// Seed address or CIDR for the subnet walk
    pub subnet: String,
    pub connection_uri: String,
}

/// Decides whether an inoperable network gets rebuilt.
pub trait RecoveryPolicy: Send + Sync {
    /// `attempt` counts rebuilds already performed for this ensure call.
    fn should_recreate(&self, attempt: u32, failure: &NetctlError) -> bool;
}

/// Rebuild at most once, and never when the hypervisor is unreachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecreateOnce;

impl RecoveryPolicy for RecreateOnce {
    fn should_recreate(&self, attempt: u32, failure: &NetctlError) -> bool {
        attempt == 0 && !failure.is_connection_failure()
    }
}

/// Result of [`NetworkManager::ensure_network`].
#[derive(Debug)]
pub enum EnsureOutcome {
    AlreadyActive,
    /// Was defined but inactive, and has been started
    Activated,
    /// Was deleted and created again. Carries the new subnet and its
    /// reservation, `None` when a concurrent creator won the definition.
    Recreated(Option<SubnetParameters>),
}

/// What `setup_network` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    AlreadyActive,
    Activated,
}

/// Drives networks through the hypervisor.
pub struct NetworkManager {
    hypervisor: Arc<dyn Hypervisor>,
    allocator: SubnetAllocator,
    guard: UsageGuard,
    settings: LifecycleSettings,
    recovery: Arc<dyn RecoveryPolicy>,
}

impl NetworkManager {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        allocator: SubnetAllocator,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            hypervisor,
            allocator,
            guard: UsageGuard,
            settings,
            recovery: Arc::new(RecreateOnce),
        }
    }

    /// Manager backed by host interfaces and lock files, tuned by `config`.
    pub fn from_config(config: &Config, hypervisor: Arc<dyn Hypervisor>) -> Self {
        let reserver = HostReservationLock::new(&config.lock_dir)
            .with_poll_interval(config.lock_poll_interval());
        let allocator = SubnetAllocator::new(Arc::new(HostInterfaces), Arc::new(reserver))
            .with_reservation_timeout(config.reservation_timeout());
        Self::new(hypervisor, allocator, config.lifecycle_settings())
    }

    pub fn with_recovery_policy(mut self, recovery: Arc<dyn RecoveryPolicy>) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn allocator(&self) -> &SubnetAllocator {
        &self.allocator
    }

    /// Make sure the network exists, autostarts and is active.
    #[instrument(skip(self, spec), fields(network = %spec.name))]
    pub async fn ensure_network(&self, spec: &NetworkSpec) -> Result<EnsureOutcome> {
        info!("ensuring network {} is active", spec.name);
        let conn = self.connect(&spec.connection_uri).await?;
        let result = self.ensure_on(conn.as_ref(), spec).await;
        close(conn).await;
        result
    }

    async fn ensure_on(&self, conn: &dyn Connection, spec: &NetworkSpec) -> Result<EnsureOutcome> {
        let mut failure = match self.setup_network(conn, &spec.name).await {
            Ok(SetupOutcome::AlreadyActive) => return Ok(EnsureOutcome::AlreadyActive),
            Ok(SetupOutcome::Activated) => return Ok(EnsureOutcome::Activated),
            Err(e) => e,
        };

        let mut attempt = 0;
        loop {
            if !self.recovery.should_recreate(attempt, &failure) {
                return Err(failure);
            }
            debug!("network {} is inoperable, will try to recreate it: {}", spec.name, failure);

            self.delete_network(spec).await.map_err(|e| recovery_failed(&spec.name, "deleting", e))?;
            let subnet = self
                .create_network(spec)
                .await
                .map_err(|e| recovery_failed(&spec.name, "recreating", e))?;

            match self.setup_network(conn, &spec.name).await {
                Ok(_) => {
                    debug!("network {} successfully recreated", spec.name);
                    return Ok(EnsureOutcome::Recreated(subnet));
                }
                Err(e) => {
                    failure = e;
                    attempt += 1;
                }
            }
        }
    }

    /// Turn autostart on and start the network if it is inactive.
    ///
    /// A missing network surfaces as a not-found hypervisor error.
    pub async fn setup_network(&self, conn: &dyn Connection, name: &str) -> Result<SetupOutcome> {
        let net = conn
            .lookup_network(name)
            .await
            .map_err(NetctlError::hypervisor(format!("failed looking up network {}", name)))?;
        let result = activate(net.as_ref(), name).await;
        free(net).await;
        result
    }

    /// Define and start the network on a free subnet.
    ///
    /// Returns `None` when a network of that name already exists; nothing is
    /// redefined in that case.
    #[instrument(skip(self, spec), fields(network = %spec.name))]
    pub async fn create_network(&self, spec: &NetworkSpec) -> Result<Option<SubnetParameters>> {
        if spec.name == self.settings.reserved_network_name {
            return Err(NetctlError::NetworkNameConflict { name: spec.name.clone() });
        }

        let conn = self.connect(&spec.connection_uri).await?;
        let result = self.create_on(conn.as_ref(), spec).await;
        close(conn).await;
        result
    }

    async fn create_on(
        &self,
        conn: &dyn Connection,
        spec: &NetworkSpec,
    ) -> Result<Option<SubnetParameters>> {
        let name = spec.name.as_str();

        match conn.lookup_network(name).await {
            Ok(existing) => {
                warn!("found existing {} network, skipping creation", name);
                match existing.xml_desc().await {
                    Ok(xml) => debug!("existing {} network:\n{}", name, xml),
                    Err(e) => debug!("failed getting {} network XML: {}", name, e),
                }
                free(existing).await;
                return Ok(None);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(NetctlError::hypervisor(format!("failed looking up network {}", name))(e))
            }
        }

        let attempts = self.settings.create_attempts;
        let mut seed = spec.subnet.clone();
        // Candidates that failed to start stay reserved until we return, so the
        // next walk steps past them
        let mut rejected: Vec<SubnetParameters> = Vec::new();
        let mut last_failure = None;

        for attempt in 1..=attempts {
            let mut subnet = self
                .allocator
                .find_free_subnet(&seed, self.settings.subnet_step, self.settings.subnet_tries)
                .await
                .map_err(|e| {
                    debug!(
                        "failed finding free subnet for private network {} after {} tries: {}",
                        name, self.settings.subnet_tries, e
                    );
                    e
                })?;

            subnet.reserve_vip();
            let xml = NetworkIntent::new(name, &spec.bridge, Some(&subnet)).to_xml()?;
            debug!("generated network template as XML:\n{}", xml);

            let net = conn.define_network(&xml).await.map_err(NetctlError::hypervisor(format!(
                "defining network {} {} from xml {}",
                name, subnet.cidr, xml
            )))?;

            debug!("creating network {} {} (attempt {}/{})", name, subnet.cidr, attempt, attempts);
            match net.create().await {
                Ok(()) => {
                    match net.xml_desc().await {
                        Ok(xml) => debug!("created network {}:\n{}", name, xml),
                        Err(e) => debug!("failed getting {} network XML: {}", name, e),
                    }
                    free(net).await;
                    info!("network {} created on {}", name, subnet.cidr);
                    metrics::counter!("netctl_networks_created_total").increment(1);
                    return Ok(Some(subnet));
                }
                Err(e) => {
                    debug!("failed creating network {} {}, will retry: {}", name, subnet.cidr, e);
                    free(net).await;
                    last_failure = Some(NetctlError::hypervisor(format!(
                        "starting network {} {}",
                        name, subnet.cidr
                    ))(e));
                    seed = subnet.cidr.to_string();
                    rejected.push(subnet);
                }
            }
        }

        debug!("releasing {} rejected subnet reservations", rejected.len());
        let source = last_failure.unwrap_or_else(|| NetctlError::InvalidConfig {
            reason: "create_attempts must be at least 1".to_string(),
        });
        Err(NetctlError::NetworkCreateFailed {
            name: name.to_string(),
            attempts,
            source: Box::new(source),
        })
    }

    /// Stop and undefine the network unless a guest still references it.
    ///
    /// Deleting a network that does not exist succeeds.
    #[instrument(skip(self, spec), fields(network = %spec.name))]
    pub async fn delete_network(&self, spec: &NetworkSpec) -> Result<()> {
        let conn = self.connect(&spec.connection_uri).await?;
        let result = self.delete_on(conn.as_ref(), &spec.name).await;
        close(conn).await;
        result
    }

    async fn delete_on(&self, conn: &dyn Connection, name: &str) -> Result<()> {
        debug!("checking if network {} exists...", name);
        let net = match conn.lookup_network(name).await {
            Ok(net) => net,
            Err(e) if e.is_not_found() => {
                warn!("network {} does not exist. Skipping deletion", name);
                return Ok(());
            }
            Err(e) => {
                return Err(NetctlError::hypervisor(format!("failed looking up network {}", name))(e))
            }
        };

        let result = self.teardown(conn, net.as_ref(), name).await;
        free(net).await;
        result
    }

    async fn teardown(&self, conn: &dyn Connection, net: &dyn NetworkObject, name: &str) -> Result<()> {
        self.guard.check_in_use(conn, name).await?;

        debug!("trying to delete network {}...", name);
        let policy = RetryPolicy::local(self.settings.delete_timeout);
        retry(&policy, "deleting network", || async move {
            let active = net
                .is_active()
                .await
                .map_err(NetctlError::hypervisor(format!("checking network status for {}", name)))?;
            if active {
                debug!("destroying active network {}", name);
                net.destroy()
                    .await
                    .map_err(NetctlError::hypervisor(format!("destroying network {}", name)))?;
            }
            debug!("undefining inactive network {}", name);
            net.undefine()
                .await
                .map_err(NetctlError::hypervisor(format!("undefining inactive network {}", name)))
        })
        .await?;

        info!("network {} deleted", name);
        metrics::counter!("netctl_networks_deleted_total").increment(1);
        Ok(())
    }

    async fn connect(&self, uri: &str) -> Result<Box<dyn Connection>> {
        self.hypervisor
            .connect(uri)
            .await
            .map_err(NetctlError::hypervisor(format!("failed opening libvirt connection to {}", uri)))
    }
}

async fn activate(net: &dyn NetworkObject, name: &str) -> Result<SetupOutcome> {
    let autostart = net
        .autostart()
        .await
        .map_err(NetctlError::hypervisor(format!("checking network {} autostart", name)))?;
    if !autostart {
        net.set_autostart(true)
            .await
            .map_err(NetctlError::hypervisor(format!("setting autostart for network {}", name)))?;
    }

    let active = net
        .is_active()
        .await
        .map_err(NetctlError::hypervisor(format!("checking network status for {}", name)))?;
    if active {
        return Ok(SetupOutcome::AlreadyActive);
    }

    net.create()
        .await
        .map_err(NetctlError::hypervisor(format!("starting network {}", name)))?;
    debug!("network {} started", name);
    Ok(SetupOutcome::Activated)
}

fn recovery_failed(name: &str, step: &'static str, source: NetctlError) -> NetctlError {
    NetctlError::NetworkRecoveryFailed { name: name.to_string(), step, source: Box::new(source) }
}

async fn close(conn: Box<dyn Connection>) {
    if let Err(e) = conn.close().await {
        error!("failed closing libvirt connection: {}", e);
    }
}

async fn free(net: Box<dyn NetworkObject>) {
    if let Err(e) = net.free().await {
        error!("failed freeing {} network: {}", net.name(), e);
    }
}
