// src/prompt.rs

//! User interaction
//!
//! The core asks the user things through the [`Prompter`] trait and never
//! renders anything itself. [`TerminalPrompter`] is the command-line
//! front-end: it answers those questions from stdin and renders workflow
//! events on stdout. In JSON mode stdout carries events only; questions and
//! notices go to stderr.

use crate::error::{Error, Result};
use crate::remediation::{Remediation, remediate, remediate_failure};
use crate::workflow::{ConversionOptions, DEFAULT_OCR_LANGUAGE, WorkflowEvent};
use std::future::Future;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

/// Answer to the first-run elevation question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevationChoice {
    /// Enter the password for every runtime invocation
    TypePassword,
    /// Join the privileged group once (requires logging out)
    JoinGroup,
    Cancel,
}

/// Questions the core needs answered by a person
pub trait Prompter {
    /// The user lacks runtime access; how should it be granted?
    fn choose_elevation(&self, user: &str, group: &str) -> Result<ElevationChoice>;

    /// The runtime is installed but stopped; may we start it?
    fn confirm_service_start(&self) -> Result<bool>;

    /// Show an informational message
    fn notify(&self, message: &str);
}

/// Style of prompt interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// Interactive TTY with formatting
    Interactive,
    /// Plain text for non-TTY use
    Simple,
    /// Events as JSON lines for programmatic consumption
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct TerminalPrompter {
    style: PromptStyle,
}

impl TerminalPrompter {
    pub fn new(style: PromptStyle) -> Self {
        Self { style }
    }

    /// Detect the appropriate prompt style based on environment
    pub fn detect() -> Self {
        let style = if io::stdout().is_terminal() {
            PromptStyle::Interactive
        } else {
            PromptStyle::Simple
        };
        Self { style }
    }

    /// Ask for a document path; `None` when the user wants to stop
    pub fn ask_document(&self) -> Result<Option<PathBuf>> {
        let answer = self.ask("Document to convert (empty to quit): ")?;
        if answer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(PathBuf::from(answer)))
        }
    }

    /// Ask for conversion options, offering remembered defaults
    pub fn ask_options(
        &self,
        default_output: &Path,
        remembered_language: Option<&str>,
        viewer_configured: bool,
    ) -> Result<ConversionOptions> {
        let output = self.ask(&format!("Save as [{}]: ", default_output.display()))?;
        let output_path = (!output.is_empty()).then(|| PathBuf::from(output));

        let ocr_language = if self.confirm("Run OCR on the sanitized PDF?", false)? {
            let default_lang = remembered_language.unwrap_or(DEFAULT_OCR_LANGUAGE);
            let lang = self.ask(&format!("OCR language [{}]: ", default_lang))?;
            Some(if lang.is_empty() {
                default_lang.to_string()
            } else {
                lang
            })
        } else {
            None
        };

        let open_when_done =
            viewer_configured && self.confirm("Open the safe PDF when done?", true)?;

        Ok(ConversionOptions {
            output_path,
            ocr_language,
            open_when_done,
        })
    }

    pub fn ask_retry(&self) -> Result<bool> {
        self.confirm("Try again?", false)
    }

    /// Render one workflow event
    pub fn render_event(&self, event: &WorkflowEvent) -> Result<()> {
        let mut stdout = io::stdout();
        match self.style {
            PromptStyle::Json => {
                writeln!(stdout, "{}", serde_json::to_string(event).map_err(io::Error::other)?)?;
            }
            PromptStyle::Interactive | PromptStyle::Simple => match event {
                WorkflowEvent::StageChanged { to, .. } => {
                    if self.style == PromptStyle::Interactive {
                        writeln!(stdout, "--- {} ---", to)?;
                    }
                }
                WorkflowEvent::Output { text, .. } => {
                    write!(stdout, "{}", text)?;
                }
                WorkflowEvent::Succeeded { output_path, .. } => {
                    writeln!(stdout, "Safe PDF created: {}", output_path.display())?;
                }
                WorkflowEvent::Failed { cause, .. } => {
                    self.show_remediation(&remediate_failure(cause))?;
                }
            },
        }
        stdout.flush()?;
        Ok(())
    }

    /// Print an error with its remediation text
    pub fn report_error(&self, err: &Error) -> Result<()> {
        if self.style == PromptStyle::Json {
            let json = serde_json::json!({
                "type": "error",
                "message": err.to_string(),
                "remediation": remediate(err).suggestion,
            });
            eprintln!("{}", json);
            return Ok(());
        }
        self.show_remediation(&remediate(err))?;
        if let Some(stderr) = err.stderr_text().filter(|s| !s.trim().is_empty()) {
            eprintln!("{}", stderr.trim_end());
        }
        Ok(())
    }

    fn show_remediation(&self, remediation: &Remediation) -> Result<()> {
        let mut stderr = io::stderr();
        match self.style {
            PromptStyle::Interactive => {
                writeln!(stderr)?;
                writeln!(stderr, "  [!] {}", remediation.heading)?;
                writeln!(stderr, "      {}", remediation.suggestion)?;
            }
            PromptStyle::Simple | PromptStyle::Json => {
                writeln!(stderr, "{}", remediation)?;
            }
        }
        Ok(())
    }

    fn prompts_to_stderr(&self) -> bool {
        self.style == PromptStyle::Json
    }

    /// Where questions and notices are written
    fn prompt_out(&self) -> Box<dyn Write> {
        if self.prompts_to_stderr() {
            Box::new(io::stderr())
        } else {
            Box::new(io::stdout())
        }
    }

    fn ask(&self, question: &str) -> Result<String> {
        let mut out = self.prompt_out();
        write!(out, "{}", question)?;
        out.flush()?;

        let mut input = String::new();
        io::stdin().lock().read_line(&mut input)?;
        Ok(input.trim().to_string())
    }

    fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            let answer = self.ask(&format!("{} {} ", question, hint))?;
            match answer.to_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => writeln!(self.prompt_out(), "Please answer y or n.")?,
            }
        }
    }
}

impl Prompter for TerminalPrompter {
    fn choose_elevation(&self, user: &str, group: &str) -> Result<ElevationChoice> {
        let mut out = self.prompt_out();
        writeln!(out)?;
        writeln!(
            out,
            "Dangerzone needs permission to use Docker. Your user '{}' is not in the '{}' group.",
            user, group
        )?;
        writeln!(out, "  [p] Type my password each time Dangerzone runs Docker")?;
        writeln!(
            out,
            "  [g] Add me to the '{}' group (you will need to log out and back in)",
            group
        )?;
        writeln!(out, "  [c] Cancel")?;

        loop {
            match self.ask("Choice [p/g/c]: ")?.to_lowercase().as_str() {
                "p" | "password" => return Ok(ElevationChoice::TypePassword),
                "g" | "group" => return Ok(ElevationChoice::JoinGroup),
                "c" | "cancel" | "q" | "" => return Ok(ElevationChoice::Cancel),
                _ => writeln!(out, "Unknown option. Please try again.")?,
            }
        }
    }

    fn confirm_service_start(&self) -> Result<bool> {
        writeln!(
            self.prompt_out(),
            "Docker is installed but does not appear to be running."
        )?;
        self.confirm("Start the Docker service now?", true)
    }

    fn notify(&self, message: &str) {
        let _ = writeln!(self.prompt_out(), "{}", message);
    }
}

/// Run a blocking question on the blocking pool, giving up if `cancel` fires
///
/// Returns `None` when canceled. The reader thread stays parked on stdin
/// until the process exits.
pub async fn answer_or_cancel<T, F, C>(question: F, cancel: C) -> Result<Option<T>>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
    C: Future,
{
    let answer = tokio::task::spawn_blocking(question);
    tokio::select! {
        answer = answer => answer.map_err(io::Error::other)?.map(Some),
        _ = cancel => Ok(None),
    }
}
