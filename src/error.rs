// src/error.rs

//! Error types for the dangerzone core
//!
//! Startup-phase errors (privilege gate, runtime readiness, custom container
//! lookup) abort startup. Conversion-time errors move a single session's
//! workflow to `Failed` and never touch other sessions.

use std::path::PathBuf;
use thiserror::Error;

/// Why a document path could not be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreadableReason {
    /// Nothing exists at the path
    NotFound,
    /// The file exists but this user may not read it
    PermissionDenied,
}

impl std::fmt::Display for UnreadableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnreadableReason::NotFound => write!(f, "File not found"),
            UnreadableReason::PermissionDenied => write!(f, "Permission denied"),
        }
    }
}

/// Errors raised by the orchestration core
#[derive(Error, Debug)]
pub enum Error {
    /// The user canceled a privileged prompt
    #[error("Authorization declined")]
    AuthorizationDeclined,

    /// The elevation helper ran but was denied (exit 126/127)
    #[error("Authorization failed (exit code {exit_code})")]
    AuthorizationFailed { exit_code: i32 },

    #[error("Container runtime is not installed")]
    RuntimeNotInstalled,

    #[error("Container runtime is not running")]
    RuntimeNotReady,

    #[error("Failed to start the container runtime service: {0}")]
    ServiceStartFailed(String),

    #[error("Container runtime service still not responding {waited_secs}s after a successful start")]
    ServiceUnresponsiveAfterStart { waited_secs: u64 },

    /// Adding the user to the privileged group failed after authorization
    #[error("Failed to add user '{user}' to the '{group}' group")]
    GroupMembershipFailed { user: String, group: String },

    #[error("{reason}: {}", path.display())]
    DocumentUnreadable {
        path: PathBuf,
        reason: UnreadableReason,
    },

    #[error("Container '{0}' not found")]
    ContainerNotFound(String),

    #[error("Container operation failed with exit code {exit_code}")]
    ContainerOperationFailed { exit_code: i32, stderr: Vec<u8> },

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot {action} while {stage}")]
    InvalidTransition { stage: String, action: &'static str },

    #[error("A conversion is already running for session {0}")]
    ConversionInFlight(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build the error for an unreadable document from the I/O failure
    ///
    /// Any kind other than permission-denied is reported as not-found,
    /// matching what a user can act on.
    pub fn unreadable(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        let reason = match err.kind() {
            std::io::ErrorKind::PermissionDenied => UnreadableReason::PermissionDenied,
            _ => UnreadableReason::NotFound,
        };
        Error::DocumentUnreadable {
            path: path.into(),
            reason,
        }
    }

    /// Captured stderr of a failed container operation, lossily decoded
    pub fn stderr_text(&self) -> Option<String> {
        match self {
            Error::ContainerOperationFailed { stderr, .. } => {
                Some(String::from_utf8_lossy(stderr).into_owned())
            }
            _ => None,
        }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_maps_permission_denied() {
        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        match Error::unreadable("/tmp/x.pdf", &err) {
            Error::DocumentUnreadable { reason, .. } => {
                assert_eq!(reason, UnreadableReason::PermissionDenied)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unreadable_maps_not_found() {
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        let e = Error::unreadable("/tmp/missing.pdf", &err);
        assert_eq!(e.to_string(), "File not found: /tmp/missing.pdf");
    }

    #[test]
    fn test_stderr_text() {
        let e = Error::ContainerOperationFailed {
            exit_code: 1,
            stderr: b"boom".to_vec(),
        };
        assert_eq!(e.stderr_text().as_deref(), Some("boom"));
        assert!(Error::RuntimeNotReady.stderr_text().is_none());
    }
}
