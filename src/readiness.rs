// src/readiness.rs

//! Runtime Readiness Checker
//!
//! The container runtime must be installed and its background service
//! answering before any conversion can start. Starting the service is a
//! privileged, blocking operation; once it reports success the runtime is
//! polled until it answers or `start_timeout` passes.

use crate::error::{Error, Result};
use crate::platform::{Platform, run_blocking};
use crate::prompt::Prompter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How to ask the runtime whether it is present and answering
pub trait RuntimeProbe: Send + Sync {
    fn is_installed(&self) -> bool;
    fn is_running(&self) -> bool;
}

/// Probe the docker CLI; `docker image ls` exiting 0 means the daemon answers
pub struct DockerProbe {
    platform: Arc<dyn Platform>,
    timeout: Duration,
}

impl DockerProbe {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            timeout: Duration::from_secs(30),
        }
    }
}

impl RuntimeProbe for DockerProbe {
    fn is_installed(&self) -> bool {
        self.platform.runtime_cli().is_some()
    }

    fn is_running(&self) -> bool {
        let Some(cli) = self.platform.runtime_cli() else {
            return false;
        };
        let argv = vec![
            cli.to_string_lossy().into_owned(),
            "image".to_string(),
            "ls".to_string(),
        ];
        match run_blocking(&argv, self.timeout) {
            Ok(Some(0)) => true,
            Ok(code) => {
                debug!("Runtime probe exited with {:?}", code);
                false
            }
            Err(e) => {
                debug!("Runtime probe failed: {}", e);
                false
            }
        }
    }
}

pub struct ReadinessChecker {
    platform: Arc<dyn Platform>,
    probe: Arc<dyn RuntimeProbe>,
    start_timeout: Duration,
    poll_interval: Duration,
}

impl ReadinessChecker {
    pub fn new(platform: Arc<dyn Platform>, start_timeout: Duration, poll_interval: Duration) -> Self {
        let probe = Arc::new(DockerProbe::new(platform.clone()));
        Self {
            platform,
            probe,
            start_timeout,
            poll_interval,
        }
    }

    /// Replace the runtime probe
    pub fn with_probe(mut self, probe: Arc<dyn RuntimeProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn is_installed(&self) -> bool {
        self.probe.is_installed()
    }

    pub fn is_running(&self) -> bool {
        self.probe.is_running()
    }

    /// Start the runtime service and wait for it to answer
    ///
    /// Blocks the caller for the duration of the password prompt and the
    /// bounded readiness wait.
    pub fn start_service(&self) -> Result<()> {
        info!("Starting the container runtime service");
        self.platform.start_service()?;

        let started = Instant::now();
        let deadline = started + self.start_timeout;
        loop {
            if self.probe.is_running() {
                info!("Container runtime is running after {:?}", started.elapsed());
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("Container runtime still not responding after start");
                return Err(Error::ServiceUnresponsiveAfterStart {
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Go/no-go for the runtime, offering to start the service if it is stopped
    pub fn ensure_ready(&self, prompter: &dyn Prompter) -> Result<()> {
        if !self.is_installed() {
            return Err(Error::RuntimeNotInstalled);
        }
        if self.is_running() {
            debug!("Container runtime is running");
            return Ok(());
        }
        if !prompter.confirm_service_start()? {
            return Err(Error::RuntimeNotReady);
        }
        self.start_service()
    }
}
