//! Error types for netctl.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use crate::hypervisor::{ErrorCode, HypervisorError};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for netctl operations.
pub type Result<T> = std::result::Result<T, NetctlError>;

/// Main error type for netctl.
#[derive(Error, Debug)]
pub enum NetctlError {
    // Address errors
    #[error("Invalid address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error(
        "No free private network subnets found with given parameters (start: {start:?}, step: {step}, tries: {tries})"
    )]
    NoFreeSubnet { start: String, step: u8, tries: u32 },

    // Reservation errors
    #[error("Subnet reservation {key} is held by another process")]
    ReservationBusy { key: String },

    #[error("Failed to lock {path:?}: {reason}")]
    LockFailed { path: PathBuf, reason: String },

    #[error("Failed listing network interfaces: {reason}")]
    InterfaceLookup { reason: String },

    // Network lifecycle errors
    #[error(
        "Network can't be named {name}. This is the name of the private network created by minikube by default"
    )]
    NetworkNameConflict { name: String },

    #[error("Failed creating network {name} after {attempts} attempts: {source}")]
    NetworkCreateFailed {
        name: String,
        attempts: u32,
        #[source]
        source: Box<NetctlError>,
    },

    #[error("Network {network} still in use at least by domain '{guest}'")]
    NetworkInUse { network: String, guest: String },

    #[error("Failed {step} inoperable network {name}: {source}")]
    NetworkRecoveryFailed {
        name: String,
        step: &'static str,
        #[source]
        source: Box<NetctlError>,
    },

    #[error("Failed to render definition of network {name}: {reason}")]
    NetworkDefinition { name: String, reason: String },

    #[error("Failed to read definition of domain '{guest}': {reason}")]
    GuestDefinition { guest: String, reason: String },

    // Hypervisor errors
    #[error("{context}: {source}")]
    Hypervisor {
        context: String,
        #[source]
        source: HypervisorError,
    },

    #[error("{operation} did not succeed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<NetctlError>,
    },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl NetctlError {
    /// Wrap a hypervisor failure with what was being attempted.
    ///
    /// Meant for `map_err`: `.map_err(NetctlError::hypervisor("starting network x"))`.
    pub fn hypervisor(context: impl Into<String>) -> impl FnOnce(HypervisorError) -> Self {
        let context = context.into();
        move |source| Self::Hypervisor { context, source }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Hypervisor { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Whether the hypervisor reported that the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Hypervisor { source, .. } if source.is_not_found())
    }

    /// Whether the hypervisor itself was unreachable.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Hypervisor { source, .. } if source.code == ErrorCode::ConnectionFailed)
    }
}
