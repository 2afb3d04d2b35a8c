// src/remediation.rs

//! User-facing remediation text for core errors
//!
//! Startup errors and conversion failures drive different advice, so every
//! error variant maps to its own heading and suggestion.

use crate::error::{Error, UnreadableReason};
use crate::workflow::FailureCause;

/// A message suitable for showing to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remediation {
    /// Short statement of what went wrong
    pub heading: String,
    /// What the user can do about it
    pub suggestion: String,
}

impl Remediation {
    fn new(heading: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            suggestion: suggestion.into(),
        }
    }
}

impl std::fmt::Display for Remediation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}", self.heading, self.suggestion)
    }
}

/// Map an error to its remediation text
pub fn remediate(err: &Error) -> Remediation {
    match err {
        Error::AuthorizationDeclined => Remediation::new(
            "Authorization was canceled.",
            "Dangerzone needs your password to control Docker. Start it again and approve the prompt.",
        ),
        Error::AuthorizationFailed { .. } => Remediation::new(
            "Authorization failed.",
            "The password prompt was denied or could not run. Check that pkexec and a polkit agent are installed.",
        ),
        Error::RuntimeNotInstalled => Remediation::new(
            "Dangerzone requires Docker.",
            "Docker does not appear to be installed. Install Docker, then start Dangerzone again.",
        ),
        Error::RuntimeNotReady => Remediation::new(
            "Docker is not running.",
            "Docker should be installed, but it looks like it's not running in the background. Start it and try again.",
        ),
        Error::ServiceStartFailed(_) => Remediation::new(
            "Failed to start the docker service, quitting.",
            "Try starting Docker manually (for example `systemctl start docker`), then start Dangerzone again.",
        ),
        Error::ServiceUnresponsiveAfterStart { .. } => Remediation::new(
            "Restarting docker appeared to work, but the service still isn't responding, quitting.",
            "Docker may still be initializing. Wait a minute and start Dangerzone again, or check `journalctl -u docker`.",
        ),
        Error::GroupMembershipFailed { group, .. } => Remediation::new(
            format!("Failed to add your user to the '{group}' group, quitting."),
            "You can choose to type your password each time instead.",
        ),
        Error::DocumentUnreadable { path, reason } => match reason {
            UnreadableReason::NotFound => Remediation::new(
                "File not found.",
                format!("Nothing exists at {}. Choose the document again.", path.display()),
            ),
            UnreadableReason::PermissionDenied => Remediation::new(
                "Permission denied.",
                format!("Your user cannot read {}. Copy it somewhere readable first.", path.display()),
            ),
        },
        Error::ContainerNotFound(name) => Remediation::new(
            format!("Container '{name}' not found."),
            "Build or pull the container image first, or omit --custom-container.",
        ),
        Error::ContainerOperationFailed { exit_code, .. } => Remediation::new(
            "Converting the document failed.",
            format!("The container exited with code {exit_code}. The details above may explain why."),
        ),
        Error::Spawn { program, .. } => Remediation::new(
            "Could not run the container helper.",
            format!("{program} could not be started. Reinstalling Dangerzone may fix this."),
        ),
        Error::InvalidTransition { .. }
        | Error::ConversionInFlight(_)
        | Error::UnknownSession(_) => Remediation::new(
            "That action is not available right now.",
            err.to_string(),
        ),
        Error::Settings(_) => Remediation::new(
            "Your settings could not be loaded or saved.",
            "Check the permissions of the dangerzone configuration directory.",
        ),
        Error::Io(_) => Remediation::new("An I/O error occurred.", err.to_string()),
    }
}

/// Remediation for a session that ended in `Failed`
pub fn remediate_failure(cause: &FailureCause) -> Remediation {
    match cause {
        FailureCause::AuthorizationFailed { exit_code } => {
            remediate(&Error::AuthorizationFailed {
                exit_code: *exit_code,
            })
        }
        FailureCause::ContainerOperationFailed { exit_code, .. } => Remediation::new(
            "Converting the document failed.",
            format!("The container exited with code {exit_code}. The details above may explain why."),
        ),
        FailureCause::Invoker { message } => Remediation::new(
            "Could not run the container helper.",
            format!("{message}. Reinstalling Dangerzone may fix this."),
        ),
    }
}
