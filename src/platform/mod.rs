// src/platform/mod.rs

//! Platform capability interface
//!
//! Everything that differs between operating systems (elevation helper,
//! privileged group, how the container runtime's service is started, where
//! the runtime CLI lives) sits behind the [`Platform`] trait. One
//! implementation per OS is selected once at process start by [`detect`];
//! the rest of the core only talks to the trait.
//!
//! Privileged helpers (`add_user_to_group`, `start_service`) are blocking
//! calls: they sit behind a modal password prompt and everything after them
//! depends on their result.

mod darwin;
#[cfg(unix)]
mod linux;
mod windows;

pub use darwin::DarwinPlatform;
#[cfg(unix)]
pub use linux::LinuxPlatform;
pub use windows::WindowsPlatform;

use crate::config::AppConfig;
use crate::container::quote_argv;
use crate::error::{Error, Result};
use crate::privilege::ElevationMode;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use wait_timeout::ChildExt;

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    Linux,
    Darwin,
    Windows,
}

impl PlatformKind {
    /// The family this binary was compiled for
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            PlatformKind::Darwin
        } else if cfg!(target_os = "windows") {
            PlatformKind::Windows
        } else {
            PlatformKind::Linux
        }
    }

    /// Whether the application stays alive after its last session closes
    pub fn keeps_running_without_sessions(&self) -> bool {
        matches!(self, PlatformKind::Darwin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Linux => "linux",
            PlatformKind::Darwin => "darwin",
            PlatformKind::Windows => "windows",
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership of the current user in the runtime's privileged group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupStatus {
    /// This platform has no group-based access path
    NotApplicable,
    /// The group does not exist on this system
    GroupMissing,
    /// The current user is already a member
    Member,
    /// The group exists and the user is not in it
    NotMember { user: String, group: String },
}

/// OS-specific capabilities used by the orchestration core
pub trait Platform: Send + Sync {
    /// Which OS family this implementation serves
    fn kind(&self) -> PlatformKind;

    /// Command prefix that wraps runtime invocations for the given preference
    fn elevation_prefix(&self, mode: Option<ElevationMode>) -> Vec<String>;

    /// Inspect privileged group membership
    fn group_check(&self) -> GroupStatus;

    /// Add `user` to `group` through the elevation helper (blocking)
    fn add_user_to_group(&self, user: &str, group: &str) -> Result<()>;

    /// Start the container runtime's background service (blocking)
    fn start_service(&self) -> Result<()>;

    /// Path of the container runtime CLI, if it is installed
    fn runtime_cli(&self) -> Option<PathBuf>;

    /// Whether the runtime lives in a virtual machine that must signal start
    fn uses_virtualization(&self) -> bool;
}

/// Select the implementation for the running OS
pub fn detect(config: &AppConfig) -> Arc<dyn Platform> {
    let platform: Arc<dyn Platform> = match PlatformKind::current() {
        #[cfg(unix)]
        PlatformKind::Linux => Arc::new(LinuxPlatform::new(
            config.resource_dir.clone(),
            config.helper_timeout,
        )),
        #[cfg(not(unix))]
        PlatformKind::Linux => Arc::new(WindowsPlatform::new()),
        PlatformKind::Darwin => Arc::new(DarwinPlatform::new(config.helper_timeout)),
        PlatformKind::Windows => Arc::new(WindowsPlatform::new()),
    };
    info!("Platform: {}", platform.kind());
    platform
}

/// Run a helper to completion, waiting at most `timeout`
///
/// Returns the exit code, or `None` if the helper timed out and was killed.
/// A helper terminated by a signal reports `-1`. Its stdout is discarded so
/// probes never write into the front-end's output; stderr stays attached.
pub(crate) fn run_blocking(argv: &[String], timeout: Duration) -> Result<Option<i32>> {
    let (program, args) = argv.split_first().ok_or_else(|| Error::Spawn {
        program: String::new(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
    })?;

    info!("Executing: {}", quote_argv(argv));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .spawn()
        .map_err(|source| Error::Spawn {
            program: program.clone(),
            source,
        })?;

    match child.wait_timeout(timeout)? {
        Some(status) => Ok(Some(status.code().unwrap_or(-1))),
        None => {
            warn!("{} timed out after {}s, killing it", program, timeout.as_secs());
            let _ = child.kill();
            let _ = child.wait();
            Ok(None)
        }
    }
}

/// Whether an elevation helper exit code means authorization was not granted
pub(crate) fn is_authorization_exit(code: i32) -> bool {
    code == 126 || code == 127
}
