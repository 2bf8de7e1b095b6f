//! Network commands for the netctl CLI.
//!
//! - netctl create
//! - netctl delete
//! - netctl inspect

use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use netctl_core::network::{AddressInspector, EnsureOutcome, HostInterfaces, NetworkManager, NetworkSpec};
use netctl_core::{Config, SubnetParameters, VirshHypervisor};
use std::sync::Arc;

fn manager(config: &Config) -> NetworkManager {
    NetworkManager::from_config(config, Arc::new(VirshHypervisor::new()))
}

/// Ensure a network exists and is active
pub async fn create(config: &Config, name: &str, subnet: Ipv4Net, bridge: &str, uri: &str) -> Result<()> {
    let spec = NetworkSpec {
        name: name.to_string(),
        bridge: bridge.to_string(),
        subnet: subnet.to_string(),
        connection_uri: uri.to_string(),
    };

    let outcome = manager(config)
        .ensure_network(&spec)
        .await
        .with_context(|| format!("failed to create network {}", name))?;

    match outcome {
        EnsureOutcome::AlreadyActive => println!("Network {} is already active", name),
        EnsureOutcome::Activated => println!("Network {} started", name),
        EnsureOutcome::Recreated(Some(subnet)) => {
            println!("Network {} created on {}", name, subnet.cidr);
            print_subnet(&subnet);
        }
        EnsureOutcome::Recreated(None) => println!("Network {} created", name),
    }
    Ok(())
}

/// Delete a network
pub async fn delete(config: &Config, name: &str, uri: &str) -> Result<()> {
    let spec = NetworkSpec {
        name: name.to_string(),
        bridge: config.bridge.clone(),
        subnet: String::new(),
        connection_uri: uri.to_string(),
    };

    manager(config)
        .delete_network(&spec)
        .await
        .with_context(|| format!("failed to delete network {}", name))?;

    println!("{}", name);
    Ok(())
}

/// Display the parameters of the subnet an address belongs to
pub fn inspect(address: &str, json: bool) -> Result<()> {
    let inspector = AddressInspector::new(Arc::new(HostInterfaces));
    let subnet = inspector.inspect(address)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&subnet)?);
    } else {
        print_subnet(&subnet);
    }
    Ok(())
}

fn print_subnet(subnet: &SubnetParameters) {
    println!("{:<12} {}", "CIDR:", subnet.cidr);
    println!("{:<12} {}", "Netmask:", subnet.netmask);
    println!("{:<12} {}", "Gateway:", subnet.gateway);
    println!("{:<12} {} - {}", "Clients:", subnet.client_min, subnet.client_max);
    println!("{:<12} {}", "Broadcast:", subnet.broadcast);
    println!("{:<12} {}", "Private:", subnet.is_private);
    if let Some(iface) = &subnet.interface {
        println!("{:<12} {} ({}, mtu {}, {})", "Interface:", iface.name, iface.ipv4, iface.mtu, iface.mac);
    }
}
