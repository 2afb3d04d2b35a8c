// src/platform/windows.rs

//! Windows: Docker Desktop, launched directly and left running on its own.

use super::{GroupStatus, Platform, PlatformKind};
use crate::container::quote_argv;
use crate::error::{Error, Result};
use crate::privilege::ElevationMode;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::info;

const DOCKER_DESKTOP: &str = r"C:\Program Files\Docker\Docker\Docker Desktop.exe";
const DOCKER_CLI: &str = r"C:\Program Files\Docker\Docker\resources\bin\docker.exe";

#[derive(Default)]
pub struct WindowsPlatform;

impl WindowsPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Platform for WindowsPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Windows
    }

    fn elevation_prefix(&self, _mode: Option<ElevationMode>) -> Vec<String> {
        Vec::new()
    }

    fn group_check(&self) -> GroupStatus {
        GroupStatus::NotApplicable
    }

    fn add_user_to_group(&self, _user: &str, _group: &str) -> Result<()> {
        Ok(())
    }

    fn start_service(&self) -> Result<()> {
        // Docker Desktop never exits on its own, so it is spawned and left alone
        info!("Executing: {}", quote_argv(&[DOCKER_DESKTOP.to_string()]));
        Command::new(DOCKER_DESKTOP)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
            .map_err(|e| Error::ServiceStartFailed(format!("{}: {}", DOCKER_DESKTOP, e)))
    }

    fn runtime_cli(&self) -> Option<PathBuf> {
        let cli = PathBuf::from(DOCKER_CLI);
        cli.exists().then_some(cli)
    }

    fn uses_virtualization(&self) -> bool {
        true
    }
}
