// src/startup.rs

//! Startup sequence
//!
//! 1. validate the document given on the command line, if any
//! 2. settle the elevation preference (Privilege Gate)
//! 3. make sure the runtime is installed and running
//! 4. check a custom container image exists
//! 5. open the first session
//!
//! Any failure before step 5 aborts startup: no session exists and no
//! container process has been spawned for a conversion.

use crate::container::ContainerInvoker;
use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::privilege::{ElevationMode, GateOutcome};
use crate::prompt::Prompter;
use crate::readiness::ReadinessChecker;
use crate::session::SessionManager;
use crate::workflow::validate_document;
use std::path::PathBuf;
use tracing::info;

/// What the command line asked for
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    /// Use this image instead of the default one
    pub custom_container: Option<String>,
    /// Open this document immediately
    pub document: Option<PathBuf>,
}

/// Everything the event loop needs after a successful start
pub struct Launched {
    pub sessions: SessionManager,
    /// The first session
    pub session_id: String,
    pub container_name: String,
    pub elevation: Option<ElevationMode>,
    /// Prefix for every runtime invocation
    pub prefix: Vec<String>,
}

pub enum StartupOutcome {
    Ready(Box<Launched>),
    /// Group membership changed; nothing works until the user logs in again
    LogoutRequired,
}

pub async fn start(
    ctx: &AppContext,
    prompter: &dyn Prompter,
    readiness: &ReadinessChecker,
    invoker: &ContainerInvoker,
    options: StartupOptions,
) -> Result<StartupOutcome> {
    let document = options
        .document
        .as_deref()
        .map(validate_document)
        .transpose()?;

    let gate = ctx.privilege_gate();
    let elevation = match gate.ensure_preference_set(prompter)? {
        GateOutcome::Ready(mode) => mode,
        GateOutcome::LogoutRequired => return Ok(StartupOutcome::LogoutRequired),
    };

    readiness.ensure_ready(prompter)?;

    let prefix = gate.resolve_elevation_prefix(elevation);
    let container_name = match options.custom_container {
        Some(name) => {
            if !invoker.container_exists(&name, &prefix).await? {
                return Err(Error::ContainerNotFound(name));
            }
            info!("Using custom container {}", name);
            name
        }
        None => ctx.config.container_name.clone(),
    };

    let mut sessions = SessionManager::new(
        container_name.clone(),
        !ctx.platform.uses_virtualization(),
        ctx.platform.kind().keeps_running_without_sessions(),
        ctx.config.termination_grace,
    );
    // The readiness check above already waited for the VM
    sessions.runtime_ready(true)?;
    let session_id = sessions
        .create_or_reuse_session(document.as_deref())?
        .id()
        .to_string();

    Ok(StartupOutcome::Ready(Box::new(Launched {
        sessions,
        session_id,
        container_name,
        elevation,
        prefix,
    })))
}
