//! Subnet allocation and virtual network lifecycle.
//!
//! The allocator finds a free private subnet and reserves it against other
//! processes on the host; the lifecycle manager defines, starts and tears
//! down libvirt networks on top of it.

pub mod allocator;
pub mod guard;
pub mod interfaces;
pub mod lifecycle;
pub mod lock;
pub mod retry;
pub mod subnet;
pub mod template;

// Re-exports for commonly used types
pub use allocator::SubnetAllocator;
pub use guard::{GuestReference, UsageGuard};
pub use interfaces::{HostInterfaces, InterfaceAddr, InterfaceSource};
pub use lifecycle::{
    EnsureOutcome, NetworkManager, NetworkSpec, RecoveryPolicy, RecreateOnce, SetupOutcome,
};
pub use lock::{HostReservationLock, Reservation, ReservationHandle, SubnetReserver};
pub use retry::{retry, RetryPolicy};
pub use subnet::{AddressInspector, BoundInterface, SubnetParameters};
pub use template::NetworkIntent;
