// src/platform/linux.rs

//! Linux: docker runs natively, access goes through the `docker` group or
//! through pkexec on every invocation.

use super::{GroupStatus, Platform, PlatformKind, is_authorization_exit, run_blocking};
use crate::error::{Error, Result};
use crate::privilege::ElevationMode;
use nix::unistd::{Gid, Group, User, getegid, getgid, getuid};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Polkit elevation helper
pub const PKEXEC: &str = "/usr/bin/pkexec";

/// Group whose members may talk to the docker socket
pub const DOCKER_GROUP: &str = "docker";

const USERMOD: &str = "/usr/sbin/usermod";
const ENABLE_SERVICE_SCRIPT: &str = "enable_docker_service.sh";

pub struct LinuxPlatform {
    resource_dir: PathBuf,
    helper_timeout: Duration,
    group: String,
}

impl LinuxPlatform {
    pub fn new(resource_dir: PathBuf, helper_timeout: Duration) -> Self {
        Self {
            resource_dir,
            helper_timeout,
            group: DOCKER_GROUP.to_string(),
        }
    }

    /// Use a different privileged group name
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    fn current_user() -> Option<User> {
        User::from_uid(getuid()).ok().flatten()
    }
}

impl Platform for LinuxPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Linux
    }

    fn elevation_prefix(&self, mode: Option<ElevationMode>) -> Vec<String> {
        match mode {
            Some(ElevationMode::TypePasswordEachTime) => vec![PKEXEC.to_string()],
            Some(ElevationMode::JoinPrivilegedGroup) | None => Vec::new(),
        }
    }

    fn group_check(&self) -> GroupStatus {
        let group = match Group::from_name(&self.group) {
            Ok(Some(group)) => group,
            Ok(None) => {
                debug!("Group '{}' does not exist", self.group);
                return GroupStatus::GroupMissing;
            }
            Err(e) => {
                debug!("Could not look up group '{}': {}", self.group, e);
                return GroupStatus::GroupMissing;
            }
        };

        let Some(user) = Self::current_user() else {
            debug!("Could not resolve the current user");
            return GroupStatus::GroupMissing;
        };

        let status = live_membership(user.name.clone(), &self.group, group.gid, &process_gids());
        let listed = user.gid == group.gid || group.mem.iter().any(|m| m == &user.name);
        if listed && status != GroupStatus::Member {
            info!(
                "{} is listed in group '{}' but this login session predates it",
                user.name, self.group
            );
        }
        status
    }

    fn add_user_to_group(&self, user: &str, group: &str) -> Result<()> {
        let argv = vec![
            PKEXEC.to_string(),
            USERMOD.to_string(),
            "-a".to_string(),
            "-G".to_string(),
            group.to_string(),
            user.to_string(),
        ];
        match run_blocking(&argv, self.helper_timeout)? {
            Some(0) => {
                info!("Added {} to group {}", user, group);
                Ok(())
            }
            Some(code) if is_authorization_exit(code) => Err(Error::AuthorizationDeclined),
            _ => Err(Error::GroupMembershipFailed {
                user: user.to_string(),
                group: group.to_string(),
            }),
        }
    }

    fn start_service(&self) -> Result<()> {
        let script = self.resource_dir.join(ENABLE_SERVICE_SCRIPT);
        let argv = vec![PKEXEC.to_string(), script.to_string_lossy().into_owned()];
        match run_blocking(&argv, self.helper_timeout)? {
            Some(0) => Ok(()),
            Some(code) if is_authorization_exit(code) => Err(Error::AuthorizationDeclined),
            Some(code) => Err(Error::ServiceStartFailed(format!(
                "{} exited with code {}",
                ENABLE_SERVICE_SCRIPT, code
            ))),
            None => Err(Error::ServiceStartFailed(format!(
                "{} did not finish within {}s",
                ENABLE_SERVICE_SCRIPT,
                self.helper_timeout.as_secs()
            ))),
        }
    }

    fn runtime_cli(&self) -> Option<PathBuf> {
        which::which("docker").ok()
    }

    fn uses_virtualization(&self) -> bool {
        false
    }
}

/// Membership as the running process sees it
///
/// `/etc/group` changes take effect at the next login, so only the
/// process's own credentials count.
fn live_membership(user: String, group: &str, gid: Gid, live_gids: &[Gid]) -> GroupStatus {
    if live_gids.contains(&gid) {
        GroupStatus::Member
    } else {
        GroupStatus::NotMember {
            user,
            group: group.to_string(),
        }
    }
}

fn process_gids() -> Vec<Gid> {
    let mut gids = vec![getgid(), getegid()];
    gids.extend(supplementary_gids());
    gids
}

#[cfg(not(target_os = "macos"))]
fn supplementary_gids() -> Vec<Gid> {
    nix::unistd::getgroups().unwrap_or_default()
}

#[cfg(target_os = "macos")]
fn supplementary_gids() -> Vec<Gid> {
    Vec::new()
}
