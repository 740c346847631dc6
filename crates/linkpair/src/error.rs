//! Error types for link-pair and traffic-shaping operations.

use std::io;

/// Result type for linkpair operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while planning or applying link configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configured value is present but outside its domain.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// The configuration field that failed validation.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The requested link name is already taken.
    #[error("link name provided ({name}) already exists")]
    NameExists {
        /// The colliding link name.
        name: String,
    },

    /// The target namespace could not be opened or entered.
    #[error("cannot enter namespace '{namespace}': {source}")]
    Namespace {
        /// The namespace identifier as configured.
        namespace: String,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// I/O error from socket or procfs operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Kernel returned an error code.
    #[error("kernel error: {message} (errno {errno})")]
    Kernel {
        /// The errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// Kernel error with operation context.
    #[error("{operation}: {message} (errno {errno})")]
    KernelWithContext {
        /// The operation that failed.
        operation: String,
        /// The errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// No link with this name exists in the namespace.
    #[error("link not found: {name}")]
    LinkNotFound {
        /// The link name that was looked up.
        name: String,
    },

    /// Message was truncated.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected message length.
        expected: usize,
        /// Actual bytes received.
        actual: usize,
    },

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Invalid attribute format.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// Response parse error.
    #[error("parse error: {0}")]
    Parse(String),

    /// Broken internal invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error for `field`.
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Create a kernel error from an errno value.
    pub fn from_errno(errno: i32) -> Self {
        let message = io::Error::from_raw_os_error(-errno).to_string();
        Self::Kernel {
            errno: -errno,
            message,
        }
    }

    /// Add context to this error.
    ///
    /// Wraps kernel errors with operation context. Other errors are returned unchanged.
    pub fn with_context(self, operation: impl Into<String>) -> Self {
        match self {
            Self::Kernel { errno, message } => Self::KernelWithContext {
                operation: operation.into(),
                errno,
                message,
            },
            other => other,
        }
    }

    /// Check if this is a "not found" error (ENOENT, ENODEV, etc.).
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } | Self::KernelWithContext { errno, .. } => {
                matches!(*errno, libc::ENOENT | libc::ENODEV)
            }
            Self::LinkNotFound { .. } => true,
            _ => false,
        }
    }

    /// Check if this is a permission error (EPERM, EACCES).
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } | Self::KernelWithContext { errno, .. } => {
                matches!(*errno, libc::EPERM | libc::EACCES)
            }
            Self::Namespace { source, .. } => source.kind() == io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }

    /// Check if this is an "already exists" error (EEXIST).
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } | Self::KernelWithContext { errno, .. } => {
                *errno == libc::EEXIST
            }
            Self::NameExists { .. } => true,
            _ => false,
        }
    }

    /// Check if this is a "device busy" error (EBUSY).
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } | Self::KernelWithContext { errno, .. } => {
                *errno == libc::EBUSY
            }
            _ => false,
        }
    }

    /// Get the errno value if this is a kernel error.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } | Self::KernelWithContext { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_errno() {
        let err = Error::from_errno(-1); // EPERM
        assert!(err.is_permission_denied());
        assert_eq!(err.errno(), Some(1));
    }

    #[test]
    fn test_with_context() {
        let err = Error::from_errno(-2).with_context("deleting link veth0");
        assert!(err.is_not_found());
        let msg = err.to_string();
        assert!(msg.contains("deleting link veth0"));
        assert!(msg.contains("No such file or directory"));
    }

    #[test]
    fn test_with_context_leaves_other_errors() {
        let err = Error::validation("loss", "must be in (0, 100]").with_context("planning");
        assert!(matches!(err, Error::Validation { field: "loss", .. }));
    }

    #[test]
    fn test_already_exists() {
        assert!(Error::from_errno(-17).is_already_exists());
        assert!(
            Error::NameExists {
                name: "veth0".into()
            }
            .is_already_exists()
        );
        assert!(!Error::from_errno(-16).is_already_exists());
    }

    #[test]
    fn test_is_busy() {
        assert!(Error::from_errno(-16).is_busy());
        assert!(!Error::from_errno(-1).is_busy());
    }

    #[test]
    fn test_namespace_permission() {
        let err = Error::Namespace {
            namespace: "blue".into(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(err.is_permission_denied());
        assert!(err.to_string().starts_with("cannot enter namespace 'blue'"));
    }

    #[test]
    fn test_error_messages() {
        let err = Error::LinkNotFound {
            name: "veth0".into(),
        };
        assert_eq!(err.to_string(), "link not found: veth0");

        let err = Error::NameExists {
            name: "veth0".into(),
        };
        assert_eq!(err.to_string(), "link name provided (veth0) already exists");

        let err = Error::validation("latency", "negative duration");
        assert_eq!(err.to_string(), "invalid latency: negative duration");
    }
}
