// src/workflow.rs

//! Conversion Workflow
//!
//! Per-session state machine:
//!
//! ```text
//! AwaitingRuntime -> DocumentSelected -> ConfiguringOptions -> Converting -> Succeeded
//!                                               ^                        \-> Failed
//!                                               \------- retry ------------/
//! ```
//!
//! `AwaitingRuntime` only exists on platforms where the runtime lives in a
//! virtual machine; in direct-invocation mode a workflow starts at
//! `DocumentSelected`. Every transition is published as a [`WorkflowEvent`]
//! on a broadcast channel. The workflow never calls back into presentation
//! code.

use crate::container::{ContainerCommand, InvocationResult, OutputChunk, OutputStream};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// OCR language used when none was chosen before
pub const DEFAULT_OCR_LANGUAGE: &str = "eng";

/// Where a session is in its conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    /// Waiting for the runtime (and its VM) to come up
    AwaitingRuntime,
    /// Waiting for a document
    DocumentSelected,
    /// Document accepted, waiting for options to be confirmed
    ConfiguringOptions,
    Converting,
    Succeeded,
    Failed,
}

impl WorkflowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStage::AwaitingRuntime => "awaiting runtime",
            WorkflowStage::DocumentSelected => "waiting for a document",
            WorkflowStage::ConfiguringOptions => "configuring options",
            WorkflowStage::Converting => "converting",
            WorkflowStage::Succeeded => "succeeded",
            WorkflowStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStage::Succeeded | WorkflowStage::Failed)
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a conversion ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// The elevation helper was denied or could not run (exit 126/127)
    AuthorizationFailed { exit_code: i32 },
    /// The container ran and failed
    ContainerOperationFailed { exit_code: i32, stderr: String },
    /// The helper could not be run at all
    Invoker { message: String },
}

impl FailureCause {
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::AuthorizationFailed { exit_code } => FailureCause::AuthorizationFailed {
                exit_code: *exit_code,
            },
            Error::ContainerOperationFailed { exit_code, stderr } => {
                FailureCause::ContainerOperationFailed {
                    exit_code: *exit_code,
                    stderr: String::from_utf8_lossy(stderr).into_owned(),
                }
            }
            other => FailureCause::Invoker {
                message: other.to_string(),
            },
        }
    }
}

/// Options confirmed before converting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionOptions {
    /// Where to write the sanitized PDF; defaults to `<stem>-safe.pdf`
    pub output_path: Option<PathBuf>,
    /// Run OCR in this language
    pub ocr_language: Option<String>,
    /// Open the result in the configured viewer
    pub open_when_done: bool,
}

/// Published on every state change and for process output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    StageChanged {
        session_id: String,
        from: WorkflowStage,
        to: WorkflowStage,
        at: DateTime<Utc>,
    },
    Output {
        session_id: String,
        stream: OutputStream,
        text: String,
    },
    Succeeded {
        session_id: String,
        output_path: PathBuf,
        open_when_done: bool,
    },
    Failed {
        session_id: String,
        cause: FailureCause,
    },
}

impl WorkflowEvent {
    pub fn session_id(&self) -> &str {
        match self {
            WorkflowEvent::StageChanged { session_id, .. }
            | WorkflowEvent::Output { session_id, .. }
            | WorkflowEvent::Succeeded { session_id, .. }
            | WorkflowEvent::Failed { session_id, .. } => session_id,
        }
    }
}

/// Expand `~`, make absolute, and check the file can be opened for reading
pub fn validate_document(path: &Path) -> Result<PathBuf> {
    let expanded = expand_home(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(expanded)
    };

    let file = File::open(&absolute).map_err(|e| Error::unreadable(&absolute, &e))?;
    let metadata = file.metadata().map_err(|e| Error::unreadable(&absolute, &e))?;
    if metadata.is_dir() {
        return Err(Error::unreadable(
            &absolute,
            &std::io::Error::from(std::io::ErrorKind::IsADirectory),
        ));
    }
    Ok(absolute)
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// `/dir/report.docx` -> `/dir/report-safe.pdf`
pub fn default_output_path(document: &Path) -> PathBuf {
    let stem = document
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    document.with_file_name(format!("{}-safe.pdf", stem))
}

/// State machine for one session's conversion
#[derive(Debug)]
pub struct ConversionWorkflow {
    session_id: String,
    stage: WorkflowStage,
    container_name: String,
    document_path: Option<PathBuf>,
    output_path: Option<PathBuf>,
    options: Option<ConversionOptions>,
    failure: Option<FailureCause>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl ConversionWorkflow {
    pub fn new(
        session_id: impl Into<String>,
        container_name: impl Into<String>,
        direct_mode: bool,
        events: broadcast::Sender<WorkflowEvent>,
    ) -> Self {
        let stage = if direct_mode {
            WorkflowStage::DocumentSelected
        } else {
            WorkflowStage::AwaitingRuntime
        };
        Self {
            session_id: session_id.into(),
            stage,
            container_name: container_name.into(),
            document_path: None,
            output_path: None,
            options: None,
            failure: None,
            events,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn stage(&self) -> WorkflowStage {
        self.stage
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn document_path(&self) -> Option<&Path> {
        self.document_path.as_deref()
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    pub fn options(&self) -> Option<&ConversionOptions> {
        self.options.as_ref()
    }

    pub fn failure(&self) -> Option<&FailureCause> {
        self.failure.as_ref()
    }

    /// The runtime reported running; `vm_started` is the VM's own start signal
    ///
    /// Returns whether the workflow left `AwaitingRuntime`. A document chosen
    /// while waiting moves the workflow straight on to `ConfiguringOptions`.
    pub fn runtime_started(&mut self, running: bool, vm_started: bool) -> Result<bool> {
        self.expect_stage(&[WorkflowStage::AwaitingRuntime], "start the runtime")?;
        if !(running && vm_started) {
            debug!(
                "Session {} still waiting (running={}, vm_started={})",
                self.session_id, running, vm_started
            );
            return Ok(false);
        }
        self.transition(WorkflowStage::DocumentSelected);
        if self.document_path.is_some() {
            self.transition(WorkflowStage::ConfiguringOptions);
        }
        Ok(true)
    }

    /// Accept a document; an unreadable path leaves the stage unchanged
    pub fn select_document(&mut self, path: &Path) -> Result<()> {
        self.expect_stage(
            &[WorkflowStage::AwaitingRuntime, WorkflowStage::DocumentSelected],
            "select a document",
        )?;
        let document = validate_document(path)?;
        info!("Session {} document: {}", self.session_id, document.display());

        self.output_path = Some(default_output_path(&document));
        self.document_path = Some(document);
        if self.stage == WorkflowStage::DocumentSelected {
            self.transition(WorkflowStage::ConfiguringOptions);
        }
        Ok(())
    }

    /// Confirm options and build the conversion command
    pub fn confirm_options(&mut self, options: ConversionOptions) -> Result<ContainerCommand> {
        self.expect_stage(&[WorkflowStage::ConfiguringOptions], "start converting")?;
        let Some(document) = self.document_path.clone() else {
            return Err(self.invalid("start converting"));
        };

        let output = options
            .output_path
            .clone()
            .unwrap_or_else(|| default_output_path(&document));
        let command = ContainerCommand::convert(
            &document,
            &output,
            &self.container_name,
            options.ocr_language.as_deref(),
        );

        self.output_path = Some(output);
        self.options = Some(options);
        self.failure = None;
        self.transition(WorkflowStage::Converting);
        Ok(command)
    }

    /// Record the invocation's result; only valid once per conversion
    pub fn finish(&mut self, result: Result<InvocationResult>) -> Result<WorkflowStage> {
        self.expect_stage(&[WorkflowStage::Converting], "finish a conversion")?;
        match result.and_then(InvocationResult::classify) {
            Ok(_) => {
                self.transition(WorkflowStage::Succeeded);
                let output_path = self.output_path.clone().unwrap_or_default();
                let open_when_done = self.options.as_ref().is_some_and(|o| o.open_when_done);
                info!("Session {} converted to {}", self.session_id, output_path.display());
                self.publish(WorkflowEvent::Succeeded {
                    session_id: self.session_id.clone(),
                    output_path,
                    open_when_done,
                });
            }
            Err(e) => self.fail(FailureCause::from_error(&e)),
        }
        Ok(self.stage)
    }

    /// Move a converting workflow to `Failed` without a process result
    pub fn record_failure(&mut self, cause: FailureCause) -> Result<()> {
        self.expect_stage(&[WorkflowStage::Converting], "record a failure")?;
        self.fail(cause);
        Ok(())
    }

    /// User-initiated retry after a failure
    pub fn retry(&mut self) -> Result<()> {
        self.expect_stage(&[WorkflowStage::Failed], "retry")?;
        self.failure = None;
        self.transition(WorkflowStage::ConfiguringOptions);
        Ok(())
    }

    fn fail(&mut self, cause: FailureCause) {
        warn!("Session {} failed: {:?}", self.session_id, cause);
        self.failure = Some(cause.clone());
        self.transition(WorkflowStage::Failed);
        self.publish(WorkflowEvent::Failed {
            session_id: self.session_id.clone(),
            cause,
        });
    }

    fn transition(&mut self, to: WorkflowStage) {
        let from = self.stage;
        self.stage = to;
        debug!("Session {}: {} -> {}", self.session_id, from, to);
        self.publish(WorkflowEvent::StageChanged {
            session_id: self.session_id.clone(),
            from,
            to,
            at: Utc::now(),
        });
    }

    fn publish(&self, event: WorkflowEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    fn expect_stage(&self, allowed: &[WorkflowStage], action: &'static str) -> Result<()> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> Error {
        Error::InvalidTransition {
            stage: self.stage.to_string(),
            action,
        }
    }
}

/// Decode as much of `pending` as forms complete UTF-8, keeping a trailing
/// partial character for the next chunk
fn take_text(pending: &mut Vec<u8>) -> String {
    let mut text = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(valid) => {
                text.push_str(valid);
                pending.clear();
                return text;
            }
            Err(e) => {
                let (valid, rest) = pending.split_at(e.valid_up_to());
                text.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    // Incomplete sequence at the end
                    None => {
                        let rest = rest.to_vec();
                        *pending = rest;
                        return text;
                    }
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        let rest = rest[len..].to_vec();
                        *pending = rest;
                    }
                }
            }
        }
    }
}

/// Republish a process's output as [`WorkflowEvent::Output`] until it closes
pub fn forward_output(
    session_id: String,
    mut output: mpsc::UnboundedReceiver<OutputChunk>,
    events: broadcast::Sender<WorkflowEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let publish = |stream, text: String| {
            if !text.is_empty() {
                let _ = events.send(WorkflowEvent::Output {
                    session_id: session_id.clone(),
                    stream,
                    text,
                });
            }
        };

        while let Some(chunk) = output.recv().await {
            let pending = match chunk.stream {
                OutputStream::Stdout => &mut stdout,
                OutputStream::Stderr => &mut stderr,
            };
            pending.extend_from_slice(&chunk.data);
            publish(chunk.stream, take_text(pending));
        }

        for (stream, rest) in [(OutputStream::Stdout, stdout), (OutputStream::Stderr, stderr)] {
            publish(stream, String::from_utf8_lossy(&rest).into_owned());
        }
    })
}
