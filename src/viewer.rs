// src/viewer.rs

//! Open the sanitized PDF in the user's chosen viewer
//!
//! On Linux `open_app` is a desktop-entry style command line whose `%f`,
//! `%F`, `%u` or `%U` argument is replaced by the file. On macOS it is an
//! application bundle identifier handed to `open -b`.

use crate::container::quote_argv;
use crate::error::{Error, Result};
use crate::platform::PlatformKind;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};

const FILE_PLACEHOLDERS: [&str; 4] = ["%f", "%F", "%u", "%U"];

/// Split a command line into words, honouring shell-style quoting
pub fn split_command(line: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '\'' => break,
                        other => current.push(other),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '"' => break,
                        '\\' => match chars.next()? {
                            escaped @ ('"' | '\\' | '$' | '`') => current.push(escaped),
                            other => {
                                current.push('\\');
                                current.push(other);
                            }
                        },
                        other => current.push(other),
                    }
                }
            }
            '\\' => {
                in_word = true;
                current.push(chars.next()?);
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Some(words)
}

/// Build the viewer command line for `file`, if one applies
pub fn viewer_argv(kind: PlatformKind, open_app: &str, file: &Path) -> Option<Vec<String>> {
    let file = file.to_string_lossy().into_owned();
    match kind {
        PlatformKind::Linux => {
            let mut argv = split_command(open_app)?;
            for arg in argv.iter_mut() {
                if FILE_PLACEHOLDERS.contains(&arg.as_str()) {
                    *arg = file.clone();
                }
            }
            (!argv.is_empty()).then_some(argv)
        }
        PlatformKind::Darwin => Some(vec![
            "open".to_string(),
            "-b".to_string(),
            open_app.to_string(),
            file,
        ]),
        PlatformKind::Windows => None,
    }
}

/// Launch the viewer in the background
pub fn open_in_viewer(kind: PlatformKind, open_app: Option<&str>, file: &Path) -> Result<()> {
    let Some(argv) = open_app.and_then(|app| viewer_argv(kind, app, file)) else {
        debug!("No PDF viewer configured");
        return Ok(());
    };
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };

    info!("Executing: {}", quote_argv(&argv));
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|source| Error::Spawn {
            program: program.clone(),
            source,
        })
}
