// src/platform/darwin.rs

//! macOS: Docker Desktop runs the engine inside a VM; no elevation prefix.

use super::{GroupStatus, Platform, PlatformKind, run_blocking};
use crate::error::{Error, Result};
use crate::privilege::ElevationMode;
use std::path::PathBuf;
use std::time::Duration;

const DOCKER_APP: &str = "/Applications/Docker.app";
const DOCKER_CLI: &str = "/Applications/Docker.app/Contents/Resources/bin/docker";

pub struct DarwinPlatform {
    helper_timeout: Duration,
}

impl DarwinPlatform {
    pub fn new(helper_timeout: Duration) -> Self {
        Self { helper_timeout }
    }
}

impl Platform for DarwinPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Darwin
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
        // -g keeps Docker Desktop in the background
        let argv = vec![
            "open".to_string(),
            "-g".to_string(),
            "-a".to_string(),
            DOCKER_APP.to_string(),
        ];
        match run_blocking(&argv, self.helper_timeout)? {
            Some(0) => Ok(()),
            Some(code) => Err(Error::ServiceStartFailed(format!(
                "open exited with code {}",
                code
            ))),
            None => Err(Error::ServiceStartFailed("open did not return".to_string())),
        }
    }

    fn runtime_cli(&self) -> Option<PathBuf> {
        let cli = PathBuf::from(DOCKER_CLI);
        cli.exists().then_some(cli)
    }

    fn uses_virtualization(&self) -> bool {
        true
    }
}
