//! libvirt control plane through the `virsh` client.
//!
//! Every call runs `virsh -q -c <uri> <command>` and maps a non-zero exit to a
//! [`HypervisorError`] whose [`ErrorCode`] is derived from libvirt's message.
//! Handles are name-based, so `free()` and `close()` have nothing to release
//! beyond logging.

use super::{Connection, DomainObject, ErrorCode, HvResult, Hypervisor, HypervisorError, NetworkObject};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Hypervisor backed by the `virsh` binary.
#[derive(Debug, Clone)]
pub struct VirshHypervisor {
    /// Path to the virsh binary
    binary_path: PathBuf,
}

impl VirshHypervisor {
    /// Use the first virsh found in the usual locations, falling back to `$PATH`.
    pub fn new() -> Self {
        let candidates = [PathBuf::from("/usr/bin/virsh"), PathBuf::from("/usr/local/bin/virsh")];
        let binary_path =
            candidates.into_iter().find(|p| p.exists()).unwrap_or_else(|| PathBuf::from("virsh"));
        Self { binary_path }
    }

    /// Use a specific virsh binary.
    pub fn with_binary(binary_path: impl Into<PathBuf>) -> Self {
        Self { binary_path: binary_path.into() }
    }
}

impl Default for VirshHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hypervisor for VirshHypervisor {
    #[instrument(skip(self))]
    async fn connect(&self, uri: &str) -> HvResult<Box<dyn Connection>> {
        let virsh = Arc::new(Virsh { binary_path: self.binary_path.clone(), uri: uri.to_string() });
        // `virsh uri` fails fast when the socket is unreachable
        virsh.run(&["uri"]).await.map_err(|e| HypervisorError {
            code: ErrorCode::ConnectionFailed,
            message: format!("failed connecting to libvirt socket: {}", e.message),
        })?;
        Ok(Box::new(VirshConnection { virsh }))
    }
}

/// Shared invocation state for one connection URI.
#[derive(Debug)]
struct Virsh {
    binary_path: PathBuf,
    uri: String,
}

impl Virsh {
    async fn run(&self, args: &[&str]) -> HvResult<String> {
        debug!(uri = %self.uri, "virsh {}", args.join(" "));
        let output = Command::new(&self.binary_path)
            .arg("-q")
            .arg("-c")
            .arg(&self.uri)
            .args(args)
            .env("LC_ALL", "C")
            .output()
            .await
            .map_err(|e| {
                HypervisorError::new(
                    ErrorCode::ConnectionFailed,
                    format!("failed to run {}: {}", self.binary_path.display(), e),
                )
            })?;

        if !output.status.success() {
            return Err(parse_error(&String::from_utf8_lossy(&output.stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Turn virsh's `error: ...` lines into a classified error.
fn parse_error(stderr: &str) -> HypervisorError {
    let message = stderr
        .lines()
        .map(|l| l.trim().trim_start_matches("error:").trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    let message = if message.is_empty() { "virsh failed without output".to_string() } else { message };
    HypervisorError::new(classify(&message), message)
}

fn classify(message: &str) -> ErrorCode {
    let lower = message.to_lowercase();
    if lower.contains("network not found") {
        ErrorCode::NoNetwork
    } else if lower.contains("domain not found") {
        ErrorCode::NoDomain
    } else if lower.contains("failed to connect") || lower.contains("no connection driver") {
        ErrorCode::ConnectionFailed
    } else if lower.contains("resource busy") {
        ErrorCode::ResourceBusy
    } else if lower.contains("xml error") || lower.contains("xml document") {
        ErrorCode::InvalidXml
    } else if lower.contains("requested operation is not valid") {
        ErrorCode::OperationInvalid
    } else {
        ErrorCode::OperationFailed
    }
}

/// Read a `Key:   yes|no` line from `net-info` output.
fn info_flag(info: &str, key: &str) -> HvResult<bool> {
    info.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim() == "yes")
        .ok_or_else(|| {
            HypervisorError::new(ErrorCode::OperationFailed, format!("net-info did not report {}", key))
        })
}

/// Every defined domain, running or shut off.
const LIST_ALL_DOMAINS: [&str; 3] = ["list", "--all", "--name"];

/// `dumpxml`, asking for the persistent definition when `inactive`.
fn domain_xml_args(name: &str, inactive: bool) -> Vec<&str> {
    let mut args = vec!["dumpxml"];
    if inactive {
        args.push("--inactive");
    }
    args.push(name);
    args
}

fn net_autostart_args(name: &str, autostart: bool) -> Vec<&str> {
    let mut args = vec!["net-autostart", name];
    if !autostart {
        args.push("--disable");
    }
    args
}

#[derive(Deserialize)]
struct NetworkName {
    name: String,
}

/// Connection over a single URI.
pub struct VirshConnection {
    virsh: Arc<Virsh>,
}

#[async_trait]
impl Connection for VirshConnection {
    async fn close(&self) -> HvResult<()> {
        debug!(uri = %self.virsh.uri, "closing libvirt connection");
        Ok(())
    }

    async fn lookup_network(&self, name: &str) -> HvResult<Box<dyn NetworkObject>> {
        self.virsh.run(&["net-info", name]).await?;
        Ok(Box::new(VirshNetwork { virsh: self.virsh.clone(), name: name.to_string() }))
    }

    async fn define_network(&self, xml: &str) -> HvResult<Box<dyn NetworkObject>> {
        let parsed: NetworkName = quick_xml::de::from_str(xml).map_err(|e| {
            HypervisorError::new(ErrorCode::InvalidXml, format!("network XML has no name: {}", e))
        })?;

        let io_err =
            |e: std::io::Error| HypervisorError::new(ErrorCode::OperationFailed, e.to_string());
        let mut file = tempfile::Builder::new()
            .prefix("netctl-")
            .suffix(".xml")
            .tempfile()
            .map_err(io_err)?;
        file.write_all(xml.as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        let path = file.path().to_string_lossy().to_string();
        self.virsh.run(&["net-define", path.as_str()]).await?;
        Ok(Box::new(VirshNetwork { virsh: self.virsh.clone(), name: parsed.name }))
    }

    async fn list_all_domains(&self) -> HvResult<Vec<Box<dyn DomainObject>>> {
        let output = self.virsh.run(&LIST_ALL_DOMAINS).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|name| {
                Box::new(VirshDomain { virsh: self.virsh.clone(), name: name.to_string() })
                    as Box<dyn DomainObject>
            })
            .collect())
    }
}

struct VirshNetwork {
    virsh: Arc<Virsh>,
    name: String,
}

#[async_trait]
impl NetworkObject for VirshNetwork {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&self) -> HvResult<()> {
        self.virsh.run(&["net-start", self.name.as_str()]).await.map(|_| ())
    }

    async fn destroy(&self) -> HvResult<()> {
        self.virsh.run(&["net-destroy", self.name.as_str()]).await.map(|_| ())
    }

    async fn undefine(&self) -> HvResult<()> {
        self.virsh.run(&["net-undefine", self.name.as_str()]).await.map(|_| ())
    }

    async fn is_active(&self) -> HvResult<bool> {
        let info = self.virsh.run(&["net-info", self.name.as_str()]).await?;
        info_flag(&info, "Active")
    }

    async fn autostart(&self) -> HvResult<bool> {
        let info = self.virsh.run(&["net-info", self.name.as_str()]).await?;
        info_flag(&info, "Autostart")
    }

    async fn set_autostart(&self, autostart: bool) -> HvResult<()> {
        self.virsh.run(&net_autostart_args(&self.name, autostart)).await.map(|_| ())
    }

    async fn xml_desc(&self) -> HvResult<String> {
        self.virsh.run(&["net-dumpxml", self.name.as_str()]).await
    }

    async fn free(&self) -> HvResult<()> {
        Ok(())
    }
}

struct VirshDomain {
    virsh: Arc<Virsh>,
    name: String,
}

#[async_trait]
impl DomainObject for VirshDomain {
    async fn name(&self) -> HvResult<String> {
        Ok(self.name.clone())
    }

    async fn xml_desc(&self, inactive: bool) -> HvResult<String> {
        self.virsh.run(&domain_xml_args(&self.name, inactive)).await
    }
}
