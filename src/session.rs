// src/session.rs

//! Session Manager
//!
//! One [`ConversionWorkflow`] per open session. Sessions are independent:
//! a failure in one never touches another, and each owns at most one
//! in-flight container process.

use crate::container::{ContainerInvoker, InvocationResult, ProcessHandle, RunningProcess};
use crate::error::{Error, Result};
use crate::workflow::{
    ConversionOptions, ConversionWorkflow, FailureCause, WorkflowEvent, WorkflowStage,
    forward_output, validate_document,
};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// What the application should do after a session closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    KeepRunning,
    QuitApplication,
}

/// One user-facing conversion
#[derive(Debug)]
pub struct Session {
    id: String,
    workflow: ConversionWorkflow,
    process: Option<ProcessHandle>,
    output_task: Option<JoinHandle<()>>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workflow(&self) -> &ConversionWorkflow {
        &self.workflow
    }

    pub fn stage(&self) -> WorkflowStage {
        self.workflow.stage()
    }

    pub fn document_path(&self) -> Option<&Path> {
        self.workflow.document_path()
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.workflow.output_path()
    }

    pub fn container_name(&self) -> &str {
        self.workflow.container_name()
    }

    pub fn is_converting(&self) -> bool {
        self.process.is_some()
    }

    fn accepts_document(&self) -> bool {
        self.document_path().is_none()
            && matches!(
                self.stage(),
                WorkflowStage::AwaitingRuntime | WorkflowStage::DocumentSelected
            )
    }
}

/// Tracks every open session
pub struct SessionManager {
    sessions: HashMap<String, Session>,
    events: broadcast::Sender<WorkflowEvent>,
    container_name: String,
    direct_mode: bool,
    keeps_running: bool,
    termination_grace: Duration,
    runtime_ready: bool,
}

impl SessionManager {
    /// `direct_mode`: no VM layer, workflows skip `AwaitingRuntime`.
    /// `keeps_running`: the application outlives its last session.
    pub fn new(
        container_name: impl Into<String>,
        direct_mode: bool,
        keeps_running: bool,
        termination_grace: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            sessions: HashMap::new(),
            events,
            container_name: container_name.into(),
            direct_mode,
            keeps_running,
            termination_grace,
            runtime_ready: direct_mode,
        }
    }

    /// Receive events from every session
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Reuse the only open session if it has no document yet, else open a new one
    ///
    /// With a document, the path is validated first; an unreadable path
    /// leaves every session untouched and creates nothing.
    pub fn create_or_reuse_session(&mut self, document: Option<&Path>) -> Result<&Session> {
        let reusable = match self.sessions.values().collect::<Vec<_>>().as_slice() {
            [only] if only.accepts_document() => Some(only.id.clone()),
            _ => None,
        };

        let id = match reusable {
            Some(id) => {
                debug!("Reusing empty session {}", id);
                if let Some(document) = document {
                    let session = self
                        .sessions
                        .get_mut(&id)
                        .ok_or_else(|| Error::UnknownSession(id.clone()))?;
                    session.workflow.select_document(document)?;
                }
                id
            }
            None => {
                // Nothing is built or published for a document that cannot be read
                let document = document.map(validate_document).transpose()?;
                let id = Uuid::new_v4().to_string();
                let mut workflow = ConversionWorkflow::new(
                    id.clone(),
                    self.container_name.clone(),
                    self.direct_mode,
                    self.events.clone(),
                );
                if !self.direct_mode && self.runtime_ready {
                    workflow.runtime_started(true, true)?;
                }
                if let Some(document) = &document {
                    workflow.select_document(document)?;
                }
                info!("Opened session {}", id);
                self.sessions.insert(
                    id.clone(),
                    Session {
                        id: id.clone(),
                        workflow,
                        process: None,
                        output_task: None,
                    },
                );
                id
            }
        };

        self.sessions
            .get(&id)
            .ok_or(Error::UnknownSession(id))
    }

    /// Assign a document to a specific session
    pub fn select_document(&mut self, id: &str, document: &Path) -> Result<()> {
        self.get_mut(id)?.workflow.select_document(document)
    }

    /// The runtime answers; release sessions waiting on it
    pub fn runtime_ready(&mut self, vm_started: bool) -> Result<()> {
        if !vm_started {
            return Ok(());
        }
        self.runtime_ready = true;
        for session in self.sessions.values_mut() {
            if session.stage() == WorkflowStage::AwaitingRuntime {
                session.workflow.runtime_started(true, vm_started)?;
            }
        }
        Ok(())
    }

    /// Confirm options and spawn the conversion for `id`
    ///
    /// Output is republished as workflow events. The caller awaits the
    /// returned process and hands its result to [`Self::complete_conversion`].
    pub fn start_conversion(
        &mut self,
        id: &str,
        options: ConversionOptions,
        invoker: &ContainerInvoker,
        prefix: &[String],
    ) -> Result<RunningProcess> {
        let events = self.events.clone();
        let session = self.get_mut(id)?;
        if session.process.is_some() {
            return Err(Error::ConversionInFlight(id.to_string()));
        }

        let command = session.workflow.confirm_options(options)?;
        let mut process = match invoker.invoke(&command, prefix) {
            Ok(process) => process,
            Err(e) => {
                session.workflow.record_failure(FailureCause::from_error(&e))?;
                return Err(e);
            }
        };

        session.process = Some(process.handle());
        if let Some(output) = process.take_output() {
            session.output_task = Some(forward_output(id.to_string(), output, events));
        }
        Ok(process)
    }

    /// Feed a finished process's result into the session's workflow
    pub async fn complete_conversion(
        &mut self,
        id: &str,
        result: Result<InvocationResult>,
    ) -> Result<WorkflowStage> {
        let session = self.get_mut(id)?;
        session.process = None;
        if let Some(task) = session.output_task.take() {
            // Output events go out before the terminal event
            let _ = task.await;
        }
        session.workflow.finish(result)
    }

    /// User-initiated retry of a failed conversion
    pub fn retry(&mut self, id: &str) -> Result<()> {
        self.get_mut(id)?.workflow.retry()
    }

    /// Kill the session's in-flight process; returns whether there was one
    pub fn cancel_conversion(&mut self, id: &str) -> Result<bool> {
        let session = self.get_mut(id)?;
        match &session.process {
            Some(handle) => {
                info!("Canceling conversion in session {}", id);
                handle.kill();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close a session, asking its in-flight process (if any) to terminate
    pub fn close_session(&mut self, id: &str) -> Result<CloseOutcome> {
        let session = self
            .sessions
            .remove(id)
            .ok_or_else(|| Error::UnknownSession(id.to_string()))?;
        if let Some(handle) = &session.process {
            info!("Session {} closed during conversion, terminating", id);
            handle.terminate(self.termination_grace);
        }
        info!("Closed session {}", id);

        if self.sessions.is_empty() && !self.keeps_running {
            Ok(CloseOutcome::QuitApplication)
        } else {
            Ok(CloseOutcome::KeepRunning)
        }
    }

    /// The application was reactivated; open an empty session if none remain
    pub fn application_activated(&mut self) -> Result<Option<String>> {
        if !self.sessions.is_empty() {
            return Ok(None);
        }
        let id = self.create_or_reuse_session(None)?.id().to_string();
        Ok(Some(id))
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Session> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| Error::UnknownSession(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn manager(keeps_running: bool) -> SessionManager {
        SessionManager::new(
            "flmcode/dangerzone",
            true,
            keeps_running,
            Duration::from_millis(100),
        )
    }

    fn document(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"data").unwrap();
        path
    }

    #[test]
    fn test_reuses_single_empty_session() {
        let dir = TempDir::new().unwrap();
        let mut sessions = manager(false);
        let first = sessions.create_or_reuse_session(None).unwrap().id().to_string();

        let a = document(&dir, "a.pdf");
        let reused = sessions.create_or_reuse_session(Some(&a)).unwrap();
        assert_eq!(reused.id(), first);
        assert_eq!(reused.document_path(), Some(a.as_path()));
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_bound_session_is_not_reused() {
        let dir = TempDir::new().unwrap();
        let mut sessions = manager(false);
        let a = document(&dir, "a.pdf");
        let b = document(&dir, "b.pdf");
        let first = sessions.create_or_reuse_session(Some(&a)).unwrap().id().to_string();
        let second = sessions.create_or_reuse_session(Some(&b)).unwrap().id().to_string();

        assert_ne!(first, second);
        assert_eq!(sessions.session(&first).unwrap().document_path(), Some(a.as_path()));
        assert_eq!(sessions.session(&second).unwrap().document_path(), Some(b.as_path()));
    }

    #[test]
    fn test_empty_request_opens_new_when_bound() {
        let mut sessions = manager(false);
        sessions.create_or_reuse_session(None).unwrap();
        let dir = TempDir::new().unwrap();
        let a = document(&dir, "a.pdf");
        let a_id = sessions.create_or_reuse_session(Some(&a)).unwrap().id().to_string();
        // The only session is bound, so this opens a second one
        sessions.create_or_reuse_session(None).unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.session(&a_id).is_some());
    }

    #[test]
    fn test_unreadable_document_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let mut sessions = manager(false);
        let err = sessions
            .create_or_reuse_session(Some(&dir.path().join("nope.pdf")))
            .unwrap_err();
        assert!(matches!(err, Error::DocumentUnreadable { .. }));
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_unreadable_document_publishes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut sessions = SessionManager::new("c", false, false, Duration::from_millis(10));
        sessions.runtime_ready(true).unwrap();
        let mut events = sessions.subscribe();

        let err = sessions
            .create_or_reuse_session(Some(&dir.path().join("nope.pdf")))
            .unwrap_err();
        assert!(matches!(err, Error::DocumentUnreadable { .. }));
        assert!(sessions.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_close_last_session_quits() {
        let mut sessions = manager(false);
        let id = sessions.create_or_reuse_session(None).unwrap().id().to_string();
        assert_eq!(sessions.close_session(&id).unwrap(), CloseOutcome::QuitApplication);
    }

    #[test]
    fn test_close_keeps_running_when_others_open() {
        let dir = TempDir::new().unwrap();
        let mut sessions = manager(false);
        let a = document(&dir, "a.pdf");
        let first = sessions.create_or_reuse_session(Some(&a)).unwrap().id().to_string();
        sessions.create_or_reuse_session(None).unwrap();
        assert_eq!(sessions.close_session(&first).unwrap(), CloseOutcome::KeepRunning);
    }

    #[test]
    fn test_persistent_application_reactivation() {
        let mut sessions = manager(true);
        let id = sessions.create_or_reuse_session(None).unwrap().id().to_string();
        assert_eq!(sessions.close_session(&id).unwrap(), CloseOutcome::KeepRunning);
        assert!(sessions.is_empty());

        let new_id = sessions.application_activated().unwrap().unwrap();
        assert_ne!(new_id, id);
        assert_eq!(sessions.len(), 1);
        assert!(sessions.application_activated().unwrap().is_none());
    }

    #[test]
    fn test_unknown_session() {
        let mut sessions = manager(false);
        assert!(matches!(
            sessions.close_session("missing"),
            Err(Error::UnknownSession(_))
        ));
    }

    #[test]
    fn test_sessions_wait_for_runtime() {
        let mut sessions = SessionManager::new("c", false, true, Duration::from_millis(10));
        let id = sessions.create_or_reuse_session(None).unwrap().id().to_string();
        assert_eq!(sessions.session(&id).unwrap().stage(), WorkflowStage::AwaitingRuntime);

        sessions.runtime_ready(true).unwrap();
        assert_eq!(sessions.session(&id).unwrap().stage(), WorkflowStage::DocumentSelected);

        let dir = TempDir::new().unwrap();
        let a = document(&dir, "a.pdf");
        let reused = sessions.create_or_reuse_session(Some(&a)).unwrap();
        assert_eq!(reused.id(), id);
        assert_eq!(reused.stage(), WorkflowStage::ConfiguringOptions);

        // Sessions opened after the runtime came up skip the wait
        let b = document(&dir, "b.pdf");
        let fresh = sessions.create_or_reuse_session(Some(&b)).unwrap();
        assert_ne!(fresh.id(), id);
        assert_eq!(fresh.stage(), WorkflowStage::ConfiguringOptions);
    }
}
