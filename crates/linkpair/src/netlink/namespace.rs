//! Network namespace files and scoped `setns` guards.
//!
//! Namespace identifiers come in three shapes:
//!
//! - `""` is the caller's current namespace
//! - anything containing `/` is a namespace file, e.g. `/proc/1234/ns/net`
//! - anything else names a namespace under [`NETNS_RUN_DIR`], as created by
//!   `ip netns add`

use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// The runtime directory where named network namespaces are stored.
pub const NETNS_RUN_DIR: &str = "/var/run/netns";

/// Namespace file of the calling thread.
const SELF_NETNS: &str = "/proc/self/ns/net";

/// Map a namespace identifier to its namespace file.
///
/// Returns `None` for the current namespace.
pub fn resolve_path(namespace: &str) -> Option<PathBuf> {
    if namespace.is_empty() {
        None
    } else if namespace.contains('/') {
        Some(PathBuf::from(namespace))
    } else {
        Some(PathBuf::from(NETNS_RUN_DIR).join(namespace))
    }
}

/// Open the namespace named by `namespace`, or the current one when empty.
pub fn open(namespace: &str) -> Result<NamespaceFd> {
    match resolve_path(namespace) {
        Some(path) => open_path(path),
        None => open_path(SELF_NETNS),
    }
}

/// Open a namespace file by path.
pub fn open_path<P: AsRef<Path>>(path: P) -> Result<NamespaceFd> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| Error::Namespace {
        namespace: path.display().to_string(),
        source,
    })?;
    Ok(NamespaceFd {
        file,
        label: path.display().to_string(),
    })
}

/// A handle to an open namespace file.
#[derive(Debug)]
pub struct NamespaceFd {
    file: File,
    label: String,
}

impl NamespaceFd {
    /// The path this namespace was opened from.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl AsRawFd for NamespaceFd {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Move the calling thread into `target` until the guard is dropped.
pub fn enter_fd(target: &NamespaceFd) -> Result<NamespaceGuard> {
    let original = open_path(SELF_NETNS)?;

    // SAFETY: setns only reads the fd, which `target` keeps open for the
    // duration of the call. CLONE_NEWNET restricts the switch to the network
    // namespace.
    let ret = unsafe { libc::setns(target.as_raw_fd(), libc::CLONE_NEWNET) };
    if ret < 0 {
        return Err(Error::Namespace {
            namespace: target.label.clone(),
            source: io::Error::last_os_error(),
        });
    }

    tracing::trace!(namespace = %target.label, "entered network namespace");
    Ok(NamespaceGuard { original })
}

/// Restores the thread's original namespace when dropped.
#[derive(Debug)]
#[must_use = "the namespace is restored as soon as the guard is dropped"]
pub struct NamespaceGuard {
    original: NamespaceFd,
}

impl NamespaceGuard {
    fn switch_back(&self) -> Result<()> {
        // SAFETY: `original` was opened from /proc/self/ns/net and is still open.
        let ret = unsafe { libc::setns(self.original.as_raw_fd(), libc::CLONE_NEWNET) };
        if ret < 0 {
            return Err(Error::Namespace {
                namespace: self.original.label.clone(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        if let Err(e) = self.switch_back() {
            tracing::warn!(error = %e, "failed to restore original network namespace");
        }
    }
}
