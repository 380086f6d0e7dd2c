use std::io::{self, Write};

use tracker_core::{JobSnapshot, JobView};

/// Writes snapshots to stdout, one line each.
pub(crate) struct SnapshotPrinter {
    json: bool,
    last_line: Option<String>,
}

impl SnapshotPrinter {
    pub(crate) fn new(json: bool) -> Self {
        Self {
            json,
            last_line: None,
        }
    }

    pub(crate) fn print(&mut self, snapshot: &JobSnapshot) -> io::Result<()> {
        let view = snapshot.view();
        let line = if self.json {
            serde_json::to_string(snapshot)?
        } else {
            status_line(snapshot, &view)
        };
        // Text lines drop the timestamp from comparison so repeats collapse.
        if !self.json && self.last_line.as_deref() == Some(strip_time(&line)) {
            return Ok(());
        }
        self.last_line = Some(strip_time(&line).to_string());

        let mut out = io::stdout().lock();
        writeln!(out, "{line}")?;
        if !self.json && view.terminal && view.has_result {
            if let Some(result) = &snapshot.result {
                writeln!(out, "{}", serde_json::to_string_pretty(result)?)?;
            }
        }
        out.flush()
    }
}

fn status_line(snapshot: &JobSnapshot, view: &JobView) -> String {
    let mut line = format!(
        "{} [{}]",
        snapshot.updated_at.format("%H:%M:%S"),
        view.phase
    );
    if let Some(job_id) = &view.job_id {
        line.push_str(&format!(" {job_id}"));
    }
    if let Some(progress) = &view.progress_text {
        line.push_str(&format!(" {progress}"));
    }
    if let Some(detail) = &view.detail {
        line.push_str(&format!(" - {detail}"));
    }
    line
}

fn strip_time(line: &str) -> &str {
    line.split_once(' ').map_or(line, |(_, rest)| rest)
}
