// src/main.rs

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use dangerzone::container::ContainerInvoker;
use dangerzone::prompt::{PromptStyle, TerminalPrompter, answer_or_cancel};
use dangerzone::startup::{self, Launched, StartupOptions, StartupOutcome};
use dangerzone::viewer::open_in_viewer;
use dangerzone::{AppConfig, AppContext, CloseOutcome, SessionManager, WorkflowEvent, WorkflowStage};
use std::process::ExitCode;
use tokio::sync::broadcast;
use tracing::{info, warn};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let code = runtime.block_on(run(cli));
    // A prompt interrupted by Ctrl-C leaves its reader blocked on stdin
    runtime.shutdown_background();
    code
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let prompter = if cli.json {
        TerminalPrompter::new(PromptStyle::Json)
    } else {
        TerminalPrompter::detect()
    };

    let ctx = AppContext::from_environment(AppConfig::default(), cli.config_dir.as_deref())?;
    let readiness = ctx.readiness_checker();
    let invoker = ctx.invoker();

    let options = StartupOptions {
        custom_container: cli.custom_container,
        document: cli.filename,
    };
    let launched = match startup::start(&ctx, &prompter, &readiness, &invoker, options).await {
        Ok(StartupOutcome::Ready(launched)) => *launched,
        Ok(StartupOutcome::LogoutRequired) => return Ok(ExitCode::SUCCESS),
        Err(e) => {
            prompter.report_error(&e)?;
            return Ok(ExitCode::FAILURE);
        }
    };

    let Launched {
        mut sessions,
        session_id,
        container_name,
        prefix,
        ..
    } = launched;
    info!("Using container {}", container_name);

    let mut events = sessions.subscribe();
    let mut current = session_id;
    loop {
        let step = convert_one(
            &ctx,
            &prompter,
            &invoker,
            &prefix,
            &mut sessions,
            &mut events,
            &current,
        )
        .await?;
        match step {
            Step::Interrupted => return Ok(ExitCode::from(130)),
            Step::Quit => return Ok(ExitCode::SUCCESS),
            Step::Done => {}
        }
        match sessions.close_session(&current)? {
            CloseOutcome::QuitApplication => return Ok(ExitCode::SUCCESS),
            CloseOutcome::KeepRunning => match sessions.application_activated()? {
                Some(id) => current = id,
                None => return Ok(ExitCode::SUCCESS),
            },
        }
    }
}

enum Step {
    /// The session reached a terminal state
    Done,
    /// The user asked to stop
    Quit,
    /// Ctrl-C; the session has already been closed
    Interrupted,
}

/// Ask a question without blocking the event loop; `None` on Ctrl-C
async fn ask<T, F>(prompter: &TerminalPrompter, question: F) -> Result<Option<T>>
where
    F: FnOnce(&TerminalPrompter) -> dangerzone::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let prompter = *prompter;
    let answer = answer_or_cancel(move || question(&prompter), tokio::signal::ctrl_c()).await?;
    if answer.is_none() {
        warn!("Interrupted");
    }
    Ok(answer)
}

/// Drive one session from document selection to a terminal state
async fn convert_one(
    ctx: &AppContext,
    prompter: &TerminalPrompter,
    invoker: &ContainerInvoker,
    prefix: &[String],
    sessions: &mut SessionManager,
    events: &mut broadcast::Receiver<WorkflowEvent>,
    id: &str,
) -> Result<Step> {
    loop {
        let Some(session) = sessions.session(id) else {
            return Ok(Step::Quit);
        };

        match session.stage() {
            WorkflowStage::AwaitingRuntime | WorkflowStage::DocumentSelected => {
                let Some(answer) = ask(prompter, |p| p.ask_document()).await? else {
                    sessions.close_session(id)?;
                    return Ok(Step::Interrupted);
                };
                let Some(path) = answer else {
                    return Ok(Step::Quit);
                };
                if let Err(e) = sessions.select_document(id, &path) {
                    prompter.report_error(&e)?;
                }
            }
            WorkflowStage::ConfiguringOptions => {
                let default_output = session
                    .output_path()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_default();
                let settings = ctx.settings.get();
                let Some(options) = ask(prompter, move |p| {
                    p.ask_options(
                        &default_output,
                        settings.ocr_language.as_deref(),
                        settings.open_app.is_some(),
                    )
                })
                .await?
                else {
                    sessions.close_session(id)?;
                    return Ok(Step::Interrupted);
                };
                if let Some(lang) = &options.ocr_language {
                    ctx.settings.update(|s| s.ocr_language = Some(lang.clone()))?;
                }

                let process = match sessions.start_conversion(id, options, invoker, prefix) {
                    Ok(process) => process,
                    Err(e) => {
                        render_pending(prompter, events)?;
                        prompter.report_error(&e)?;
                        continue;
                    }
                };

                let wait = process.wait();
                tokio::pin!(wait);
                let result = loop {
                    tokio::select! {
                        result = &mut wait => break Some(result),
                        event = events.recv() => render(prompter, event)?,
                        _ = tokio::signal::ctrl_c() => {
                            warn!("Interrupted, stopping the conversion");
                            sessions.close_session(id)?;
                            let _ = (&mut wait).await;
                            break None;
                        }
                    }
                };
                let Some(result) = result else {
                    return Ok(Step::Interrupted);
                };

                sessions.complete_conversion(id, result).await?;
                render_pending(prompter, events)?;
            }
            // Conversions are awaited in the arm above
            WorkflowStage::Converting => return Ok(Step::Done),
            WorkflowStage::Succeeded => {
                let workflow = session.workflow();
                let open = workflow.options().is_some_and(|o| o.open_when_done);
                if let (true, Some(output)) = (open, workflow.output_path()) {
                    let open_app = ctx.settings.get().open_app;
                    if let Err(e) = open_in_viewer(ctx.platform.kind(), open_app.as_deref(), output) {
                        prompter.report_error(&e)?;
                    }
                }
                return Ok(Step::Done);
            }
            WorkflowStage::Failed => match ask(prompter, |p| p.ask_retry()).await? {
                Some(true) => sessions.retry(id)?,
                Some(false) => return Ok(Step::Done),
                None => {
                    sessions.close_session(id)?;
                    return Ok(Step::Interrupted);
                }
            },
        }
    }
}

fn render(
    prompter: &TerminalPrompter,
    event: std::result::Result<WorkflowEvent, broadcast::error::RecvError>,
) -> Result<()> {
    match event {
        Ok(event) => prompter.render_event(&event)?,
        Err(broadcast::error::RecvError::Lagged(n)) => warn!("Dropped {} workflow events", n),
        Err(broadcast::error::RecvError::Closed) => {}
    }
    Ok(())
}

fn render_pending(
    prompter: &TerminalPrompter,
    events: &mut broadcast::Receiver<WorkflowEvent>,
) -> Result<()> {
    loop {
        match events.try_recv() {
            Ok(event) => prompter.render_event(&event)?,
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                warn!("Dropped {} workflow events", n)
            }
            Err(_) => return Ok(()),
        }
    }
}
