// src/context.rs

//! Application context
//!
//! Built once at process start and passed to the components that need it,
//! so tests can substitute any piece.

use crate::config::AppConfig;
use crate::container::ContainerInvoker;
use crate::error::{Error, Result};
use crate::platform::{self, Platform};
use crate::privilege::PrivilegeGate;
use crate::readiness::ReadinessChecker;
use crate::settings::SettingsStore;
use std::path::Path;
use std::sync::Arc;

pub struct AppContext {
    pub config: AppConfig,
    pub settings: Arc<SettingsStore>,
    pub platform: Arc<dyn Platform>,
}

impl AppContext {
    pub fn new(config: AppConfig, settings: Arc<SettingsStore>, platform: Arc<dyn Platform>) -> Self {
        Self {
            config,
            settings,
            platform,
        }
    }

    /// Detect the platform and open the settings store
    ///
    /// `config_dir` overrides the platform-conventional settings location.
    pub fn from_environment(config: AppConfig, config_dir: Option<&Path>) -> Result<Self> {
        let dir = match config_dir {
            Some(dir) => dir.to_path_buf(),
            None => SettingsStore::default_dir().ok_or_else(|| {
                Error::Settings("no per-user configuration directory".to_string())
            })?,
        };
        let settings = Arc::new(SettingsStore::open(&dir)?);
        let platform = platform::detect(&config);
        Ok(Self::new(config, settings, platform))
    }

    pub fn privilege_gate(&self) -> PrivilegeGate {
        PrivilegeGate::new(self.platform.clone(), self.settings.clone())
    }

    pub fn readiness_checker(&self) -> ReadinessChecker {
        ReadinessChecker::new(
            self.platform.clone(),
            self.config.service_start_timeout,
            self.config.service_poll_interval,
        )
    }

    pub fn invoker(&self) -> ContainerInvoker {
        ContainerInvoker::new(self.config.runtime_binary.clone())
    }
}
