// src/privilege.rs

//! Privilege Gate
//!
//! Decides whether runtime invocations must be wrapped in an elevation
//! helper and owns the one-time choice between typing a password for every
//! invocation and joining the runtime's privileged group.
//!
//! Joining the group only takes effect after the user logs out and back in,
//! so that path reports [`GateOutcome::LogoutRequired`] instead of pretending
//! the new membership is live.

use crate::error::{Error, Result};
use crate::platform::{GroupStatus, Platform};
use crate::prompt::{ElevationChoice, Prompter};
use crate::settings::SettingsStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Message shown after the user was added to the privileged group
pub const LOGOUT_REQUIRED_MESSAGE: &str =
    "Great! Now you must log out of your computer and log back in, and then you can use Dangerzone.";

/// Persisted elevation preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationMode {
    /// Wrap every runtime invocation in the elevation helper
    TypePasswordEachTime,
    /// The user joined the privileged group and invokes the runtime directly
    JoinPrivilegedGroup,
}

impl std::fmt::Display for ElevationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElevationMode::TypePasswordEachTime => write!(f, "type password each time"),
            ElevationMode::JoinPrivilegedGroup => write!(f, "privileged group member"),
        }
    }
}

/// Result of [`PrivilegeGate::ensure_preference_set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Invocations may proceed using this preference (`None`: no elevation needed)
    Ready(Option<ElevationMode>),
    /// Group membership was granted but needs a fresh login session
    LogoutRequired,
}

pub struct PrivilegeGate {
    platform: Arc<dyn Platform>,
    settings: Arc<SettingsStore>,
}

impl PrivilegeGate {
    pub fn new(platform: Arc<dyn Platform>, settings: Arc<SettingsStore>) -> Self {
        Self { platform, settings }
    }

    /// Command prefix for runtime invocations under `preference`
    pub fn resolve_elevation_prefix(&self, preference: Option<ElevationMode>) -> Vec<String> {
        self.platform.elevation_prefix(preference)
    }

    /// Make sure an elevation preference is settled before touching the runtime
    ///
    /// A persisted preference is returned without prompting. Otherwise the
    /// platform's group status decides whether the user has to choose; a
    /// canceled prompt is [`Error::AuthorizationDeclined`].
    pub fn ensure_preference_set(&self, prompter: &dyn Prompter) -> Result<GateOutcome> {
        if let Some(mode) = self.settings.elevation_mode() {
            debug!("Using saved elevation preference: {}", mode);
            if mode == ElevationMode::JoinPrivilegedGroup
                && matches!(self.platform.group_check(), GroupStatus::NotMember { .. })
            {
                // Added to the group, but this login session predates it
                return Ok(GateOutcome::LogoutRequired);
            }
            return Ok(GateOutcome::Ready(Some(mode)));
        }

        match self.platform.group_check() {
            GroupStatus::NotApplicable => Ok(GateOutcome::Ready(None)),
            GroupStatus::Member => {
                debug!("User already has direct runtime access");
                Ok(GateOutcome::Ready(None))
            }
            GroupStatus::GroupMissing => {
                info!("No privileged group on this system, elevating each invocation");
                Ok(GateOutcome::Ready(Some(ElevationMode::TypePasswordEachTime)))
            }
            GroupStatus::NotMember { user, group } => self.ask(prompter, &user, &group),
        }
    }

    fn ask(&self, prompter: &dyn Prompter, user: &str, group: &str) -> Result<GateOutcome> {
        match prompter.choose_elevation(user, group)? {
            ElevationChoice::Cancel => {
                info!("User canceled the elevation choice");
                Err(Error::AuthorizationDeclined)
            }
            ElevationChoice::TypePassword => {
                let mode = ElevationMode::TypePasswordEachTime;
                self.settings.set_elevation_mode(mode)?;
                info!("Saved elevation preference: {}", mode);
                Ok(GateOutcome::Ready(Some(mode)))
            }
            ElevationChoice::JoinGroup => {
                if let Err(e) = self.platform.add_user_to_group(user, group) {
                    warn!("Adding {} to {} failed: {}", user, group, e);
                    return Err(e);
                }
                self.settings
                    .set_elevation_mode(ElevationMode::JoinPrivilegedGroup)?;
                prompter.notify(LOGOUT_REQUIRED_MESSAGE);
                Ok(GateOutcome::LogoutRequired)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformKind;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StubPlatform {
        status: GroupStatus,
        add_result: fn() -> Result<()>,
        adds: AtomicUsize,
    }

    impl Platform for StubPlatform {
        fn kind(&self) -> PlatformKind {
            PlatformKind::Linux
        }
        fn elevation_prefix(&self, mode: Option<ElevationMode>) -> Vec<String> {
            match mode {
                Some(ElevationMode::TypePasswordEachTime) => vec!["pkexec".to_string()],
                _ => Vec::new(),
            }
        }
        fn group_check(&self) -> GroupStatus {
            self.status.clone()
        }
        fn add_user_to_group(&self, _user: &str, _group: &str) -> Result<()> {
            self.adds.fetch_add(1, Ordering::SeqCst);
            (self.add_result)()
        }
        fn start_service(&self) -> Result<()> {
            Ok(())
        }
        fn runtime_cli(&self) -> Option<PathBuf> {
            None
        }
        fn uses_virtualization(&self) -> bool {
            false
        }
    }

    struct OneAnswer {
        choice: ElevationChoice,
        asked: AtomicUsize,
        notices: Mutex<Vec<String>>,
    }

    impl OneAnswer {
        fn new(choice: ElevationChoice) -> Self {
            Self {
                choice,
                asked: AtomicUsize::new(0),
                notices: Mutex::new(Vec::new()),
            }
        }
    }

    impl Prompter for OneAnswer {
        fn choose_elevation(&self, _user: &str, _group: &str) -> Result<ElevationChoice> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            Ok(self.choice)
        }
        fn confirm_service_start(&self) -> Result<bool> {
            Ok(true)
        }
        fn notify(&self, message: &str) {
            self.notices.lock().unwrap().push(message.to_string());
        }
    }

    fn not_member() -> GroupStatus {
        GroupStatus::NotMember {
            user: "alice".into(),
            group: "docker".into(),
        }
    }

    fn gate(status: GroupStatus, add_result: fn() -> Result<()>) -> (PrivilegeGate, Arc<StubPlatform>, TempDir) {
        let dir = TempDir::new().unwrap();
        let settings = Arc::new(SettingsStore::open(dir.path()).unwrap());
        let platform = Arc::new(StubPlatform {
            status,
            add_result,
            adds: AtomicUsize::new(0),
        });
        (PrivilegeGate::new(platform.clone(), settings), platform, dir)
    }

    #[test]
    fn test_cancel_is_authorization_declined() {
        let (gate, _, _dir) = gate(not_member(), || Ok(()));
        let prompter = OneAnswer::new(ElevationChoice::Cancel);
        let err = gate.ensure_preference_set(&prompter).unwrap_err();
        assert!(matches!(err, Error::AuthorizationDeclined));
    }

    #[test]
    fn test_type_password_is_persisted() {
        let (gate, _, dir) = gate(not_member(), || Ok(()));
        let prompter = OneAnswer::new(ElevationChoice::TypePassword);
        let outcome = gate.ensure_preference_set(&prompter).unwrap();
        assert_eq!(outcome, GateOutcome::Ready(Some(ElevationMode::TypePasswordEachTime)));

        let reopened = SettingsStore::open(dir.path()).unwrap();
        assert_eq!(reopened.elevation_mode(), Some(ElevationMode::TypePasswordEachTime));
        assert_eq!(gate.resolve_elevation_prefix(Some(ElevationMode::TypePasswordEachTime)), vec!["pkexec"]);
    }

    #[test]
    fn test_join_group_requires_logout() {
        let (gate, platform, _dir) = gate(not_member(), || Ok(()));
        let prompter = OneAnswer::new(ElevationChoice::JoinGroup);
        let outcome = gate.ensure_preference_set(&prompter).unwrap();
        assert_eq!(outcome, GateOutcome::LogoutRequired);
        assert_eq!(platform.adds.load(Ordering::SeqCst), 1);
        assert_eq!(prompter.notices.lock().unwrap().as_slice(), [LOGOUT_REQUIRED_MESSAGE]);

        // Still not a member in this login session
        let outcome = gate.ensure_preference_set(&prompter).unwrap();
        assert_eq!(outcome, GateOutcome::LogoutRequired);
        assert_eq!(prompter.asked.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_group_add_is_not_persisted() {
        let (gate, _, dir) = gate(not_member(), || {
            Err(Error::GroupMembershipFailed {
                user: "alice".into(),
                group: "docker".into(),
            })
        });
        let prompter = OneAnswer::new(ElevationChoice::JoinGroup);
        let err = gate.ensure_preference_set(&prompter).unwrap_err();
        assert!(matches!(err, Error::GroupMembershipFailed { .. }));
        assert!(SettingsStore::open(dir.path()).unwrap().elevation_mode().is_none());
    }

    #[test]
    fn test_missing_group_falls_back_to_password() {
        let (gate, _, _dir) = gate(GroupStatus::GroupMissing, || Ok(()));
        let prompter = OneAnswer::new(ElevationChoice::Cancel);
        let outcome = gate.ensure_preference_set(&prompter).unwrap();
        assert_eq!(outcome, GateOutcome::Ready(Some(ElevationMode::TypePasswordEachTime)));
        assert_eq!(prompter.asked.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_member_needs_no_elevation() {
        let (gate, _, _dir) = gate(GroupStatus::Member, || Ok(()));
        let prompter = OneAnswer::new(ElevationChoice::Cancel);
        assert_eq!(gate.ensure_preference_set(&prompter).unwrap(), GateOutcome::Ready(None));
    }
}
