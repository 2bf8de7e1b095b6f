//! Hypervisor control-plane abstraction.
//!
//! netctl never talks to libvirt directly from the network engine. It goes
//! through the [`Hypervisor`] trait:
//! - Linux: [`VirshHypervisor`] drives the `virsh` client
//! - Tests: in-memory fakes
//!
//! Handles are scoped to a single operation. Callers must `free()` network
//! handles and `close()` connections on every exit path.

use async_trait::async_trait;
use thiserror::Error;

pub mod virsh;

pub use virsh::VirshHypervisor;

/// Machine-checkable failure class reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Network does not exist
    NoNetwork,
    /// Domain does not exist
    NoDomain,
    /// Hypervisor socket unreachable
    ConnectionFailed,
    /// Device or resource busy
    ResourceBusy,
    /// Operation not valid in the object's current state
    OperationInvalid,
    /// Definition rejected as malformed
    InvalidXml,
    /// Anything else
    OperationFailed,
}

/// Error returned by hypervisor calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HypervisorError {
    pub code: ErrorCode,
    pub message: String,
}

impl HypervisorError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.code, ErrorCode::NoNetwork | ErrorCode::NoDomain)
    }

    /// Busy, unreachable and state-race failures usually resolve on their own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ConnectionFailed
                | ErrorCode::ResourceBusy
                | ErrorCode::OperationInvalid
                | ErrorCode::OperationFailed
        )
    }
}

/// Result of a single control-plane call.
pub type HvResult<T> = std::result::Result<T, HypervisorError>;

/// Entry point to a hypervisor control plane.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Open a connection to the control socket at `uri` (e.g. `qemu:///system`).
    async fn connect(&self, uri: &str) -> HvResult<Box<dyn Connection>>;
}

/// An open control-plane connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Close the connection. Called exactly once, on every exit path.
    async fn close(&self) -> HvResult<()>;

    /// Look up a defined network (active or not) by name.
    ///
    /// Fails with [`ErrorCode::NoNetwork`] when nothing is defined under `name`.
    async fn lookup_network(&self, name: &str) -> HvResult<Box<dyn NetworkObject>>;

    /// Define (persist, but do not start) a network from its XML description.
    async fn define_network(&self, xml: &str) -> HvResult<Box<dyn NetworkObject>>;

    /// List every defined domain, running or shut off.
    async fn list_all_domains(&self) -> HvResult<Vec<Box<dyn DomainObject>>>;
}

/// A defined network.
#[async_trait]
pub trait NetworkObject: Send + Sync {
    fn name(&self) -> &str;

    /// Start (activate) the network.
    async fn create(&self) -> HvResult<()>;

    /// Stop the network without removing its definition.
    async fn destroy(&self) -> HvResult<()>;

    /// Remove the persistent definition.
    async fn undefine(&self) -> HvResult<()>;

    async fn is_active(&self) -> HvResult<bool>;

    async fn autostart(&self) -> HvResult<bool>;

    async fn set_autostart(&self, autostart: bool) -> HvResult<()>;

    async fn xml_desc(&self) -> HvResult<String>;

    /// Release the handle.
    async fn free(&self) -> HvResult<()>;
}

/// A defined guest machine.
#[async_trait]
pub trait DomainObject: Send + Sync {
    async fn name(&self) -> HvResult<String>;

    /// Domain XML. `inactive` asks for the persistent definition rather than
    /// the live one, so shut-off guests are covered too.
    async fn xml_desc(&self, inactive: bool) -> HvResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(HypervisorError::new(ErrorCode::NoNetwork, "x").is_not_found());
        assert!(HypervisorError::new(ErrorCode::NoDomain, "x").is_not_found());
        assert!(!HypervisorError::new(ErrorCode::ResourceBusy, "x").is_not_found());

        assert!(HypervisorError::new(ErrorCode::ResourceBusy, "x").is_transient());
        assert!(HypervisorError::new(ErrorCode::ConnectionFailed, "x").is_transient());
        assert!(!HypervisorError::new(ErrorCode::NoNetwork, "x").is_transient());
        assert!(!HypervisorError::new(ErrorCode::InvalidXml, "x").is_transient());
    }
}
