// build.rs - Stamp the CLI version string with the build revision
//
// NETCTL_REVISION is set by release tooling (e.g. `git rev-parse --short HEAD`);
// local builds report "unknown".

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=NETCTL_REVISION");

    let version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    let revision = env::var("NETCTL_REVISION")
        .ok()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=NETCTL_BUILD_VERSION={} (revision {})", version, revision.trim());
}
