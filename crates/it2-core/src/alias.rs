//! Socket alias guard
//!
//! The terminal's private socket lives under `Application Support`, a path
//! with a space in it that can also run past the `sun_path` limit of
//! `sockaddr_un`. When the path cannot be dialed directly, the transport
//! dials a symbolic link in a short, space-free directory instead.
//!
//! A [`SocketAlias`] owns that link and removes it when dropped, which covers
//! normal close, connect errors, and panics. A process killed by a signal
//! cannot run destructors, so aliases carry the owner's PID in their name and
//! every new alias first sweeps away links whose owner is no longer alive.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// File name prefix of every alias
const ALIAS_PREFIX: &str = "it2-socket-";

/// Longest socket path dialed without an alias
///
/// `sun_path` is 104 bytes on macOS and 108 on Linux, including the
/// terminating NUL.
pub const MAX_SOCKET_PATH_LEN: usize = 103;

/// Per-process counter keeping concurrent aliases distinct
static ALIAS_SEQ: AtomicU64 = AtomicU64::new(0);

/// Whether a socket path must be reached through an alias
///
/// True for paths containing whitespace or non-ASCII characters, paths that
/// are not valid UTF-8, and paths longer than [`MAX_SOCKET_PATH_LEN`].
pub fn needs_alias(path: &Path) -> bool {
    match path.to_str() {
        Some(s) => {
            s.len() > MAX_SOCKET_PATH_LEN
                || s.chars().any(|c| c.is_whitespace() || !c.is_ascii())
        }
        None => true,
    }
}

/// Symbolic link to a socket, removed on drop
#[derive(Debug)]
pub struct SocketAlias {
    link: PathBuf,
    target: PathBuf,
}

impl SocketAlias {
    /// Create an alias for `target` inside `dir`
    ///
    /// Stale aliases left by dead processes are removed first.
    #[cfg(unix)]
    pub fn create(target: &Path, dir: &Path) -> io::Result<Self> {
        let swept = sweep_stale_aliases(dir);
        if swept > 0 {
            tracing::debug!(dir = %dir.display(), swept, "Removed stale socket aliases");
        }

        let seq = ALIAS_SEQ.fetch_add(1, Ordering::Relaxed);
        let link = dir.join(format!("{}{}-{}", ALIAS_PREFIX, std::process::id(), seq));
        remove_alias(&link)?;
        std::os::unix::fs::symlink(target, &link)?;

        tracing::debug!(
            link = %link.display(),
            target = %target.display(),
            "Created socket alias"
        );

        Ok(Self {
            link,
            target: target.to_path_buf(),
        })
    }

    /// Aliases are symbolic links, which this platform does not offer
    #[cfg(not(unix))]
    pub fn create(_target: &Path, _dir: &Path) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "socket aliases require Unix symbolic links",
        ))
    }

    /// Path of the link to dial
    pub fn path(&self) -> &Path {
        &self.link
    }

    /// Socket the link points at
    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl Drop for SocketAlias {
    fn drop(&mut self) {
        match remove_alias(&self.link) {
            Ok(()) => tracing::debug!(link = %self.link.display(), "Removed socket alias"),
            Err(e) => tracing::warn!("Failed to remove socket alias {:?}: {}", self.link, e),
        }
    }
}

/// Remove an alias link
///
/// Returns `Ok(())` if nothing exists at `path`. Refuses to delete anything
/// that is not a symbolic link.
fn remove_alias(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        },
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket alias", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Owner PID encoded in an alias file name
fn alias_owner(file_name: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(ALIAS_PREFIX)?;
    let pid = rest.split('-').next()?;
    pid.parse().ok()
}

/// Remove aliases in `dir` whose owning process has exited
///
/// Returns the number of links removed. Unreadable directories are skipped.
pub fn sweep_stale_aliases(dir: &Path) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), "Skipping alias sweep: {}", e);
            return 0;
        }
    };

    let our_pid = std::process::id();
    let mut removed = 0;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(alias_owner) else {
            continue;
        };
        if pid == our_pid || is_process_alive(pid) {
            continue;
        }
        match remove_alias(&entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => tracing::debug!("Leaving {:?} in place: {}", entry.path(), e),
        }
    }

    removed
}

/// Check if a process with the given PID is still alive
///
/// Uses kill(pid, 0): success or EPERM both mean the process exists.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    unsafe {
        if libc::kill(pid, 0) == 0 {
            return true;
        }
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Without a liveness probe every owner is assumed alive
#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    true
}
