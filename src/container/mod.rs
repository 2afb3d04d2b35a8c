// src/container/mod.rs

//! Container Invoker
//!
//! Every runtime operation goes through the `dangerzone-container` helper
//! binary. The final command line is always
//!
//! ```text
//! [elevation prefix...] <runtime binary> <subcommand> [args...]
//! ```
//!
//! Spawning never blocks: [`ContainerInvoker::invoke`] returns a
//! [`RunningProcess`] whose stdout and stderr are drained continuously by
//! background tasks, so a chatty child never stalls on a full pipe.
//!
//! Exit codes are part of the helper's contract:
//!
//! | code        | meaning                                     |
//! |-------------|---------------------------------------------|
//! | `0`         | success                                     |
//! | `126`/`127` | elevation denied or the helper could not run |
//! | other       | the container operation failed              |

mod listing;

pub use listing::container_listed;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 8 * 1024;

/// How long output may stay open after the process itself has exited
const OUTPUT_LINGER: Duration = Duration::from_secs(2);

/// Quote one argument for display in a POSIX shell
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    let safe = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\"'\"'"))
    }
}

/// Render a command line the way a user could paste it into a shell
pub fn quote_argv(argv: &[String]) -> String {
    argv.iter()
        .map(|a| quote_arg(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Arguments for one runtime helper invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCommand {
    argv: Vec<String>,
    needs_elevation: bool,
}

impl ContainerCommand {
    pub fn new(argv: Vec<String>, needs_elevation: bool) -> Self {
        Self {
            argv,
            needs_elevation,
        }
    }

    /// `ls --container-name <name>`
    pub fn list(container_name: &str) -> Self {
        Self::new(
            vec![
                "ls".to_string(),
                "--container-name".to_string(),
                container_name.to_string(),
            ],
            true,
        )
    }

    /// Sanitize `document` into `output` inside `container_name`
    pub fn convert(
        document: &Path,
        output: &Path,
        container_name: &str,
        ocr_language: Option<&str>,
    ) -> Self {
        let mut argv = vec![
            "convert".to_string(),
            "--document-filename".to_string(),
            document.to_string_lossy().into_owned(),
            "--output-filename".to_string(),
            output.to_string_lossy().into_owned(),
            "--container-name".to_string(),
            container_name.to_string(),
            "--ocr".to_string(),
        ];
        match ocr_language {
            Some(lang) => {
                argv.push("1".to_string());
                argv.push("--ocr-lang".to_string());
                argv.push(lang.to_string());
            }
            None => argv.push("0".to_string()),
        }
        Self::new(argv, true)
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Full command line: prefix (when elevation applies), binary, arguments
    pub fn final_argv(&self, prefix: &[String], runtime_binary: &Path) -> Vec<String> {
        let mut full = Vec::with_capacity(prefix.len() + 1 + self.argv.len());
        if self.needs_elevation {
            full.extend(prefix.iter().cloned());
        }
        full.push(runtime_binary.to_string_lossy().into_owned());
        full.extend(self.argv.iter().cloned());
        full
    }
}

/// Outcome of a finished invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl InvocationResult {
    /// Apply the helper's exit-code contract
    pub fn classify(self) -> Result<InvocationResult> {
        match self.exit_code {
            0 => Ok(self),
            126 | 127 => Err(Error::AuthorizationFailed {
                exit_code: self.exit_code,
            }),
            exit_code => Err(Error::ContainerOperationFailed {
                exit_code,
                stderr: self.stderr,
            }),
        }
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A piece of output read from a running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopRequest {
    None,
    Graceful(Duration),
    Force,
}

/// Cloneable handle for stopping a running process from elsewhere
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    stop: Arc<watch::Sender<StopRequest>>,
}

impl ProcessHandle {
    /// SIGTERM, then SIGKILL if the process outlives `grace`
    pub fn terminate(&self, grace: Duration) {
        self.stop.send_replace(StopRequest::Graceful(grace));
    }

    /// Kill immediately
    pub fn kill(&self) {
        self.stop.send_replace(StopRequest::Force);
    }
}

/// A spawned runtime helper
pub struct RunningProcess {
    child: Child,
    output: Option<mpsc::UnboundedReceiver<OutputChunk>>,
    stdout: Option<Drain>,
    stderr: Option<Drain>,
    stop_rx: watch::Receiver<StopRequest>,
    handle: ProcessHandle,
}

enum Next {
    Exited(std::io::Result<ExitStatus>),
    Stop(StopRequest),
    Detached,
}

impl RunningProcess {
    /// Output as it is produced; `None` once taken
    pub fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<OutputChunk>> {
        self.output.take()
    }

    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }

    /// Wait for exit, honouring stop requests made through a [`ProcessHandle`]
    ///
    /// There is no timeout: conversions of large documents take as long as
    /// they take.
    pub async fn wait(mut self) -> Result<InvocationResult> {
        let status = loop {
            let next = tokio::select! {
                status = self.child.wait() => Next::Exited(status),
                changed = self.stop_rx.changed() => match changed {
                    Ok(()) => Next::Stop(*self.stop_rx.borrow_and_update()),
                    Err(_) => Next::Detached,
                },
            };
            match next {
                Next::Exited(status) => break status?,
                Next::Stop(StopRequest::None) => continue,
                Next::Detached => break self.child.wait().await?,
                Next::Stop(StopRequest::Graceful(grace)) => {
                    break terminate_then_kill(&mut self.child, grace).await?;
                }
                Next::Stop(StopRequest::Force) => {
                    info!("Killing container process");
                    kill_now(&mut self.child);
                    break self.child.wait().await?;
                }
            }
        };

        // Anything the helper left behind may still hold the pipes open
        let (stdout, stderr) = tokio::join!(
            join_drain(self.stdout.take(), OUTPUT_LINGER),
            join_drain(self.stderr.take(), OUTPUT_LINGER),
        );
        let exit_code = exit_code(status);
        debug!("Container process exited with code {}", exit_code);

        Ok(InvocationResult {
            exit_code,
            stdout,
            stderr,
        })
    }
}

/// Spawns runtime helper processes
#[derive(Debug, Clone)]
pub struct ContainerInvoker {
    runtime_binary: PathBuf,
    spawned: Arc<AtomicU64>,
}

impl ContainerInvoker {
    pub fn new(runtime_binary: impl Into<PathBuf>) -> Self {
        Self {
            runtime_binary: runtime_binary.into(),
            spawned: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn runtime_binary(&self) -> &Path {
        &self.runtime_binary
    }

    /// Number of processes spawned so far
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Spawn `command` without waiting for it
    ///
    /// Must be called from within a tokio runtime.
    pub fn invoke(&self, command: &ContainerCommand, prefix: &[String]) -> Result<RunningProcess> {
        let argv = command.final_argv(prefix, &self.runtime_binary);
        let (program, args) = argv.split_first().ok_or_else(|| Error::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;

        info!("Executing: {}", quote_argv(&argv));

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Stop requests signal the whole group, including the helper's children
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            program: program.clone(),
            source,
        })?;
        self.spawned.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let stdout = child
            .stdout
            .take()
            .map(|s| Drain::spawn(s, OutputStream::Stdout, tx.clone()));
        let stderr = child
            .stderr
            .take()
            .map(|s| Drain::spawn(s, OutputStream::Stderr, tx));

        let (stop_tx, stop_rx) = watch::channel(StopRequest::None);

        Ok(RunningProcess {
            child,
            output: Some(rx),
            stdout,
            stderr,
            stop_rx,
            handle: ProcessHandle {
                stop: Arc::new(stop_tx),
            },
        })
    }

    /// Spawn `command` and wait for it, returning the raw result
    pub async fn run(&self, command: &ContainerCommand, prefix: &[String]) -> Result<InvocationResult> {
        self.invoke(command, prefix)?.wait().await
    }

    /// Whether the runtime lists an image named exactly `name`
    pub async fn container_exists(&self, name: &str, prefix: &[String]) -> Result<bool> {
        let result = self
            .run(&ContainerCommand::list(name), prefix)
            .await?
            .classify()?;
        Ok(container_listed(&result.stdout_text(), name))
    }
}

/// Background reader for one output stream
struct Drain {
    task: JoinHandle<()>,
    captured: Arc<Mutex<Vec<u8>>>,
}

impl Drain {
    fn spawn<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<OutputChunk>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(drain(reader, stream, tx, captured.clone()));
        Self { task, captured }
    }
}

async fn drain<R>(
    mut reader: R,
    stream: OutputStream,
    tx: mpsc::UnboundedSender<OutputChunk>,
    captured: Arc<Mutex<Vec<u8>>>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                lock(&captured).extend_from_slice(&buf[..n]);
                // Nobody listening is fine, the bytes are still captured
                let _ = tx.send(OutputChunk {
                    stream,
                    data: buf[..n].to_vec(),
                });
            }
            Err(e) => {
                warn!("Reading {:?} failed: {}", stream, e);
                break;
            }
        }
    }
}

fn lock(captured: &Mutex<Vec<u8>>) -> std::sync::MutexGuard<'_, Vec<u8>> {
    captured.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Wait up to `linger` for end of output, then detach and keep what was read
async fn join_drain(drain: Option<Drain>, linger: Duration) -> Vec<u8> {
    let Some(Drain { mut task, captured }) = drain else {
        return Vec::new();
    };
    if timeout(linger, &mut task).await.is_err() {
        warn!(
            "Output still open {}ms after the container process exited, detaching",
            linger.as_millis()
        );
        task.abort();
    }
    std::mem::take(&mut *lock(&captured))
}

/// Send `signal` to the child's process group; false if it could not be sent
#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not send {:?} to container process group {}: {}", signal, pid, e);
            false
        }
    }
}

fn kill_now(child: &mut Child) {
    #[cfg(unix)]
    {
        if signal_group(child, nix::sys::signal::Signal::SIGKILL) {
            return;
        }
    }
    if let Err(e) = child.start_kill() {
        warn!("Could not kill container process: {}", e);
    }
}

async fn terminate_then_kill(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        info!("Sending SIGTERM to container process group {:?}", child.id());
        signal_group(child, nix::sys::signal::Signal::SIGTERM);
    }
    #[cfg(not(unix))]
    kill_now(child);

    match timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                "Container process still running {}ms after SIGTERM, killing it",
                grace.as_millis()
            );
            kill_now(child);
            child.wait().await
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
