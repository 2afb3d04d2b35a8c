// src/config.rs

//! Application configuration
//!
//! Resolved once at process start and handed to every component through
//! [`crate::context::AppContext`]. Values come from the platform defaults,
//! the `DANGERZONE_DEV` environment variable and the command line.

use crate::platform::PlatformKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Container image used when `--custom-container` is not given
pub const DEFAULT_CONTAINER_NAME: &str = "flmcode/dangerzone";

/// Environment variable that switches to a source-checkout layout
pub const DEV_MODE_ENV: &str = "DANGERZONE_DEV";

/// Runtime settings for the orchestration core
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// The `dangerzone-container` helper every invocation goes through
    pub runtime_binary: PathBuf,
    /// Directory holding helper scripts such as `enable_docker_service.sh`
    pub resource_dir: PathBuf,
    /// Container image name
    pub container_name: String,
    /// How long a closed session's process gets to exit after SIGTERM
    pub termination_grace: Duration,
    /// Upper bound on waiting for the runtime after starting its service
    pub service_start_timeout: Duration,
    /// How often readiness is re-probed while waiting
    pub service_poll_interval: Duration,
    /// Upper bound on a privileged helper (password prompt included)
    pub helper_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::for_platform(PlatformKind::current())
    }
}

impl AppConfig {
    /// Resolve the default layout for a platform
    pub fn for_platform(kind: PlatformKind) -> Self {
        let (runtime_binary, resource_dir) = if std::env::var_os(DEV_MODE_ENV).is_some() {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            (
                cwd.join("dev_scripts").join("dangerzone-container"),
                cwd.join("share"),
            )
        } else {
            installed_layout(kind)
        };

        Self {
            runtime_binary,
            resource_dir,
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
            termination_grace: Duration::from_secs(5),
            service_start_timeout: Duration::from_secs(60),
            service_poll_interval: Duration::from_secs(1),
            helper_timeout: Duration::from_secs(300),
        }
    }

    /// Use a different runtime helper binary
    pub fn with_runtime_binary<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.runtime_binary = path.into();
        self
    }

    /// Set the resource directory
    pub fn with_resource_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.resource_dir = path.into();
        self
    }

    /// Set the container image name
    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = name.into();
        self
    }

    /// Set the grace period between SIGTERM and SIGKILL
    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }
}

fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn installed_layout(kind: PlatformKind) -> (PathBuf, PathBuf) {
    match kind {
        PlatformKind::Linux => (
            PathBuf::from("/usr/bin/dangerzone-container"),
            PathBuf::from("/usr/share/dangerzone"),
        ),
        PlatformKind::Darwin => {
            let dir = exe_dir();
            let resources = dir
                .parent()
                .map(|contents| contents.join("Resources").join("share"))
                .unwrap_or_else(|| dir.join("share"));
            (dir.join("dangerzone-container"), resources)
        }
        PlatformKind::Windows => {
            let dir = exe_dir();
            (dir.join("dangerzone-container.exe"), dir.join("share"))
        }
    }
}
