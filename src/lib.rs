// src/lib.rs

//! Dangerzone orchestration core
//!
//! Converts untrusted documents into safe PDFs by running the conversion
//! inside a container, never in this process.
//!
//! # Architecture
//!
//! - Privilege Gate: whether runtime calls need an elevation helper
//! - Readiness Checker: runtime installed and its service answering
//! - Container Invoker: spawns the runtime helper and streams its output
//! - Conversion Workflow: per-session state machine, publishes events
//! - Session Manager: one workflow per open session
//!
//! OS-specific behavior sits behind [`platform::Platform`]; app-wide state
//! travels in an explicit [`context::AppContext`].

pub mod config;
pub mod container;
pub mod context;
mod error;
pub mod platform;
pub mod privilege;
pub mod prompt;
pub mod readiness;
pub mod remediation;
pub mod session;
pub mod settings;
pub mod startup;
pub mod viewer;
pub mod workflow;

pub use config::{AppConfig, DEFAULT_CONTAINER_NAME};
pub use container::{ContainerCommand, ContainerInvoker, InvocationResult, container_listed};
pub use context::AppContext;
pub use error::{Error, Result, UnreadableReason};
pub use platform::{GroupStatus, Platform, PlatformKind};
pub use privilege::{ElevationMode, GateOutcome, PrivilegeGate};
pub use prompt::{ElevationChoice, Prompter};
pub use readiness::{ReadinessChecker, RuntimeProbe};
pub use session::{CloseOutcome, Session, SessionManager};
pub use settings::{Settings, SettingsStore};
pub use startup::{Launched, StartupOptions, StartupOutcome};
pub use workflow::{ConversionOptions, ConversionWorkflow, FailureCause, WorkflowEvent, WorkflowStage};
