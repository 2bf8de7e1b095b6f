//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters

use metrics::describe_counter;

/// Register all core metrics with descriptions.
pub fn register_core_metrics() {
    // Allocation metrics
    describe_counter!(
        "netctl_subnet_allocations_total",
        "Subnet allocation walks (by status: success, exhausted)"
    );

    // Lifecycle metrics
    describe_counter!("netctl_networks_created_total", "Total number of networks defined and started");
    describe_counter!("netctl_networks_deleted_total", "Total number of networks undefined");
    describe_counter!(
        "netctl_network_delete_blocked_total",
        "Deletions refused because a guest still references the network"
    );

    // Retry metrics
    describe_counter!("netctl_retries_total", "Retried hypervisor calls (by operation)");
}
