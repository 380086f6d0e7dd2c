use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracker_engine::{ScheduleStrategy, StatusEndpoint, StatusTransport, TrackerSettings};
use tracker_logging::{tracker_info, tracker_warn};

use crate::cli::Cli;

const CONFIG_FILENAME: &str = "tracker.ron";

/// Settings file contents. Every field is optional; absent fields keep the
/// built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct FileConfig {
    base_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
    schedule: Option<ScheduleStrategy>,
    max_consecutive_failures: Option<u32>,
    status_endpoint: Option<StatusEndpoint>,
    transport: Option<StatusTransport>,
    fallback_to_poll: Option<bool>,
    max_job_duration_secs: Option<u64>,
}

/// Defaults, then the settings file, then command-line flags.
pub(crate) fn resolve_settings(cli: &Cli) -> Result<TrackerSettings> {
    let file = match &cli.config {
        Some(path) => load(path)?,
        None => load_optional(&PathBuf::from(CONFIG_FILENAME))?,
    };

    let mut settings = TrackerSettings::default();
    file.apply(&mut settings);

    if let Some(server) = &cli.server {
        settings.base_url = server.clone();
    }
    if cli.push {
        settings.transport = StatusTransport::Push;
    }
    if let Some(millis) = cli.poll_interval_ms {
        settings.poll_interval = Duration::from_millis(millis);
    }
    if let Some(secs) = cli.max_duration {
        settings.max_job_duration = Some(Duration::from_secs(secs));
    }
    Ok(settings)
}

fn load(path: &Path) -> Result<FileConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading settings from {}", path.display()))?;
    let config = ron::from_str(&content)
        .with_context(|| format!("parsing settings from {}", path.display()))?;
    tracker_info!("Loaded settings from {:?}", path);
    Ok(config)
}

fn load_optional(path: &Path) -> Result<FileConfig> {
    match fs::metadata(path) {
        Ok(_) => load(path),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(err) => {
            tracker_warn!("Ignoring settings at {:?}: {}", path, err);
            Ok(FileConfig::default())
        }
    }
}

impl FileConfig {
    fn apply(self, settings: &mut TrackerSettings) {
        if let Some(base_url) = self.base_url {
            settings.base_url = base_url;
        }
        if let Some(secs) = self.connect_timeout_secs {
            settings.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.request_timeout_secs {
            settings.request_timeout = Duration::from_secs(secs);
        }
        if let Some(millis) = self.poll_interval_ms {
            settings.poll_interval = Duration::from_millis(millis);
        }
        if let Some(schedule) = self.schedule {
            settings.schedule = schedule;
        }
        if let Some(limit) = self.max_consecutive_failures {
            settings.max_consecutive_failures = limit;
        }
        if let Some(endpoint) = self.status_endpoint {
            settings.status_endpoint = endpoint;
        }
        if let Some(transport) = self.transport {
            settings.transport = transport;
        }
        if let Some(fallback) = self.fallback_to_poll {
            settings.fallback_to_poll = fallback;
        }
        if let Some(secs) = self.max_job_duration_secs {
            settings.max_job_duration = Some(Duration::from_secs(secs));
        }
    }
}
