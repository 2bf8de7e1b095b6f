//! Centralized path configuration for netctl.

use std::path::PathBuf;

/// Get the netctl configuration directory.
///
/// Resolution order:
/// 1. `NETCTL_CONFIG_DIR` environment variable
/// 2. `<user config dir>/netctl`
/// 3. `~/.netctl` when the platform has no config dir
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("NETCTL_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    dirs::config_dir()
        .map(|d| d.join("netctl"))
        .or_else(|| dirs::home_dir().map(|h| h.join(".netctl")))
        .unwrap_or_else(|| PathBuf::from(".netctl"))
}

/// Get the directory holding subnet reservation lock files.
///
/// Shared by every netctl process on the host, so it defaults to the system
/// temp directory rather than a per-user location.
pub fn lock_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("NETCTL_LOCK_DIR") {
        return PathBuf::from(dir);
    }
    std::env::temp_dir().join("netctl-locks")
}
