// Command line arguments

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::db::models::MarkCategory;
use crate::engine::external::link::DEFAULT_BAUD_RATE;

#[derive(Debug, Parser, Clone)]
#[command(version, about)]
pub struct LoggerArgs {
    /// Directory holding the database, settings and record files
    #[arg(short = 'd', long = "data-dir", default_value = "fieldlogger-data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Open, close or show the logging session
    #[command(subcommand)]
    Session(SessionCommand),

    /// Place a manual mark in the open session
    Mark(MarkCommand),

    /// Remove the mark placed in the last few seconds
    Undo,

    /// Set the logging interval in seconds (1-3600)
    Interval { secs: u64 },

    /// Log the open session until interrupted
    Run(RunCommand),

    /// Manage the cached external-device header
    #[command(subcommand)]
    Header(HeaderCommand),

    /// List serial ports an external device could be attached to
    Ports,
}

#[derive(Debug, Subcommand, Clone)]
pub enum SessionCommand {
    Open { name: String },
    Close,
    Show,
}

#[derive(Debug, Args, Clone)]
pub struct MarkCommand {
    /// Preset category id, or free text
    #[arg(short = 'c', long = "category")]
    pub category: Option<String>,

    #[arg(short = 'l', long = "label")]
    pub label: Option<String>,
}

impl MarkCommand {
    pub fn category(&self) -> Option<MarkCategory> {
        self.category.as_deref().map(|raw| match raw.trim().parse::<i64>() {
            Ok(id) => MarkCategory::Id(id),
            Err(_) => MarkCategory::Text(raw.to_string()),
        })
    }
}

#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Serial port of the external sensor board
    #[arg(long = "device")]
    pub device: Option<String>,

    #[arg(long = "baud", default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum HeaderCommand {
    /// Forget the cached header so the next connection asks again
    Refresh,
}
