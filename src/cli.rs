// src/cli.rs
//! Command-line interface definition

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dangerzone")]
#[command(version)]
#[command(about = "Take potentially dangerous documents and convert them to safe PDFs", long_about = None)]
pub struct Cli {
    /// Use a custom container instead of flmcode/dangerzone
    #[arg(long, value_name = "NAME")]
    pub custom_container: Option<String>,

    /// Directory holding settings.toml (default: per-user config directory)
    #[arg(long, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Print workflow events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Document to open immediately
    pub filename: Option<PathBuf>,
}
