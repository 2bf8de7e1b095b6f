//! netctl core library
//!
//! Free private subnet discovery, host-wide subnet reservations and the
//! libvirt network lifecycle used by the `netctl` CLI.

pub mod config;
pub mod error;
pub mod hypervisor;
pub mod network;
pub mod observability;
pub mod paths;

// Re-export commonly used items
pub use config::{Config, LifecycleSettings};
pub use error::{NetctlError, Result};
pub use hypervisor::{Hypervisor, HypervisorError, VirshHypervisor};
pub use network::{
    AddressInspector, EnsureOutcome, NetworkManager, NetworkSpec, SubnetAllocator, SubnetParameters,
};
pub use observability::init as init_observability;
