//! Host-local subnet reservations.
//!
//! A reservation is an exclusive `flock(2)` on a file named after the SHA-1 of
//! the subnet. The kernel drops the lock when the holding process exits, so a
//! crashed netctl never leaves a subnet reserved. Lock files are never
//! removed: unlinking a file another process is about to lock would let two
//! processes hold "the same" lock.

use crate::error::{NetctlError, Result};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use sha1::{Digest, Sha1};
use std::fmt;
use std::fs::{DirBuilder, File, Permissions};
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Mode of the shared lock directory: world-writable with the sticky bit, like `/tmp`.
const LOCK_DIR_MODE: u32 = 0o1777;

/// Mode of lock files, so any user on the host can open and flock them.
const LOCK_FILE_MODE: u32 = 0o666;

/// How often a waiting `acquire` retries the lock.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Stable, bounded-length lock name for `key`.
///
/// Truncated to 40 characters, the same bound as the mutex names used by the
/// other cooperating tools on the host.
pub fn lock_name(key: &str) -> String {
    let mut name = format!("nc{}", hex::encode(Sha1::digest(key.as_bytes())));
    name.truncate(40);
    name
}

/// Something that can be released exactly once.
pub trait Reservation: Send + Sync {
    fn release(&mut self) -> Result<()>;
}

/// Ownership token for a reserved subnet.
///
/// Releases on drop; [`ReservationHandle::release`] releases early and is
/// idempotent.
pub struct ReservationHandle {
    key: String,
    inner: Option<Box<dyn Reservation>>,
}

impl ReservationHandle {
    pub fn new(key: impl Into<String>, inner: Box<dyn Reservation>) -> Self {
        Self { key: key.into(), inner: Some(inner) }
    }

    /// The reserved key (canonical subnet string).
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_held(&self) -> bool {
        self.inner.is_some()
    }

    pub fn release(&mut self) -> Result<()> {
        if let Some(mut inner) = self.inner.take() {
            inner.release()?;
            debug!("released reservation {}", self.key);
        }
        Ok(())
    }
}

impl Drop for ReservationHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("failed releasing reservation {}: {}", self.key, e);
        }
    }
}

impl fmt::Debug for ReservationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReservationHandle").field("key", &self.key).field("held", &self.is_held()).finish()
    }
}

/// Exclusive, non-queueing subnet reservations shared by cooperating processes.
#[async_trait]
pub trait SubnetReserver: Send + Sync {
    /// Reserve `key`, waiting at most `timeout`.
    ///
    /// Fails with [`NetctlError::ReservationBusy`] when another holder keeps
    /// the key past the timeout.
    async fn reserve(&self, key: &str, timeout: Duration) -> Result<ReservationHandle>;
}

/// flock-backed reservations in a shared lock directory.
#[derive(Debug, Clone)]
pub struct HostReservationLock {
    dir: PathBuf,
    poll_interval: Duration,
}

impl HostReservationLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), poll_interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lock file used for `key`.
    pub fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", lock_name(key)))
    }

    /// Acquire the lock for `key`, polling until `timeout` elapses.
    #[instrument(skip(self))]
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<ReservationHandle> {
        ensure_lock_dir(&self.dir)?;

        let path = self.lock_path(key);
        let deadline = Instant::now() + timeout;
        loop {
            let file = open_lock_file(&path)?;

            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(lock) => {
                    debug!("acquired reservation {} ({})", key, path.display());
                    let inner = FlockReservation { lock: Some(lock), path };
                    return Ok(ReservationHandle::new(key, Box::new(inner)));
                }
                Err((_, errno)) if errno == Errno::EWOULDBLOCK => {}
                Err((_, errno)) => {
                    return Err(NetctlError::LockFailed { path, reason: errno.to_string() });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(NetctlError::ReservationBusy { key: key.to_string() });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

/// Create the shared lock directory so every user on the host can add lock files.
///
/// An existing directory is left alone; it may belong to another user.
fn ensure_lock_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    let io_err = |e: std::io::Error| NetctlError::IoError { path: dir.to_path_buf(), source: e };

    match DirBuilder::new().recursive(true).mode(LOCK_DIR_MODE).create(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists && dir.is_dir() => return Ok(()),
        Err(e) => return Err(io_err(e)),
    }
    // The umask strips the sticky and write bits from the requested mode
    std::fs::set_permissions(dir, Permissions::from_mode(LOCK_DIR_MODE)).map_err(io_err)?;
    debug!("created lock directory {}", dir.display());
    Ok(())
}

/// Open `path` for locking, creating it world-readable and writable if absent.
///
/// flock only needs a read descriptor, so files created by another user with
/// a stricter mode still work.
fn open_lock_file(path: &Path) -> Result<File> {
    let lock_err = |e: std::io::Error| NetctlError::LockFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    match File::open(path) {
        Ok(file) => return Ok(file),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(lock_err(e)),
    }

    match File::options().write(true).create_new(true).mode(LOCK_FILE_MODE).open(path) {
        Ok(file) => {
            if let Err(e) = std::fs::set_permissions(path, Permissions::from_mode(LOCK_FILE_MODE)) {
                warn!("failed widening permissions of {}: {}", path.display(), e);
            }
            Ok(file)
        }
        // Lost the race to create it
        Err(e) if e.kind() == ErrorKind::AlreadyExists => File::open(path).map_err(lock_err),
        Err(e) => Err(lock_err(e)),
    }
}

#[async_trait]
impl SubnetReserver for HostReservationLock {
    async fn reserve(&self, key: &str, timeout: Duration) -> Result<ReservationHandle> {
        self.acquire(key, timeout).await
    }
}

struct FlockReservation {
    lock: Option<Flock<File>>,
    path: PathBuf,
}

impl Reservation for FlockReservation {
    fn release(&mut self) -> Result<()> {
        if let Some(lock) = self.lock.take() {
            lock.unlock().map_err(|(_, errno)| NetctlError::LockFailed {
                path: self.path.clone(),
                reason: errno.to_string(),
            })?;
        }
        Ok(())
    }
}
