use std::path::PathBuf;

use clap::{ArgGroup, Parser, ValueEnum};

use crate::platform::logging::LogDestination;

/// Job tracker - submit a pitch for evaluation and follow it until it settles
#[derive(Parser, Debug)]
#[command(name = "job-tracker")]
#[command(version)]
#[command(about = "Submit a pitch for evaluation and track it to completion", long_about = None)]
#[command(group(ArgGroup::new("input").required(true).args(["file", "pitch", "url"])))]
pub struct Cli {
    /// Service base URL (e.g., http://localhost:8000)
    #[arg(short = 's', long = "server")]
    pub server: Option<String>,

    /// Settings file in RON format (default: ./tracker.ron when present)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Upload this document
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,

    /// Evaluate this pitch text
    #[arg(short = 'p', long = "pitch")]
    pub pitch: Option<String>,

    /// Evaluate the venture described at this address
    #[arg(long = "url")]
    pub url: Option<String>,

    /// Follow status over the push channel instead of polling
    #[arg(long = "push")]
    pub push: bool,

    /// Poll interval in milliseconds
    #[arg(long = "poll-interval-ms", value_name = "MILLIS")]
    pub poll_interval_ms: Option<u64>,

    /// Fail the job when it has not settled after this many seconds
    #[arg(long = "max-duration", value_name = "SECONDS")]
    pub max_duration: Option<u64>,

    /// Print every snapshot as a JSON line
    #[arg(long = "json")]
    pub json: bool,

    /// Where log output goes
    #[arg(long = "log", value_enum, default_value_t = LogTarget::File)]
    pub log: LogTarget,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogTarget {
    File,
    Terminal,
    Both,
    Off,
}

impl Cli {
    pub fn log_destination(&self) -> Option<LogDestination> {
        match self.log {
            LogTarget::File => Some(LogDestination::File),
            LogTarget::Terminal => Some(LogDestination::Terminal),
            LogTarget::Both => Some(LogDestination::Both),
            LogTarget::Off => None,
        }
    }
}
