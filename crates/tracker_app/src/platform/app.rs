use std::fs;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracker_core::{JobSnapshot, Phase};
use tracker_engine::{JobController, Payload};
use tracker_logging::{tracker_info, tracker_warn};

use super::config::resolve_settings;
use super::render::SnapshotPrinter;
use crate::cli::Cli;

/// Submits the requested payload and streams snapshots until the job settles.
/// Ctrl-C cancels the job; a second Ctrl-C is ignored until it settles.
pub async fn run_app(cli: Cli) -> Result<ExitCode> {
    let settings = resolve_settings(&cli)?;
    let payload = read_payload(&cli)?;
    tracker_info!(
        "tracking against {} via {:?}",
        settings.base_url,
        settings.transport
    );

    let controller = JobController::new(settings).context("building job controller")?;
    let (snapshot_tx, mut snapshot_rx) = mpsc::unbounded_channel::<JobSnapshot>();
    let _subscription = controller.observe(move |snapshot| {
        let _ = snapshot_tx.send(snapshot.clone());
    });

    let mut printer = SnapshotPrinter::new(cli.json);
    let submit = controller.submit(payload);
    tokio::pin!(submit);
    let mut submitted = false;
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            result = &mut submit, if !submitted => {
                submitted = true;
                match result {
                    Ok(job_id) => tracker_info!("job {} accepted", job_id),
                    Err(err) => tracker_warn!("submission ended: {}", err),
                }
            }
            snapshot = snapshot_rx.recv() => {
                let Some(snapshot) = snapshot else {
                    bail!("job controller stopped before the job settled");
                };
                printer.print(&snapshot).context("writing status")?;
                if snapshot.phase.is_terminal() {
                    return Ok(exit_code(snapshot.phase));
                }
            }
            signal = tokio::signal::ctrl_c(), if !cancel_requested => {
                signal.context("listening for Ctrl-C")?;
                cancel_requested = true;
                tracker_info!("cancel requested from terminal");
                controller.cancel();
            }
        }
    }
}

fn read_payload(cli: &Cli) -> Result<Payload> {
    if let Some(path) = &cli.file {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        return Ok(Payload::document(file_name, bytes));
    }
    if let Some(pitch) = &cli.pitch {
        return Ok(Payload::Pitch(pitch.clone()));
    }
    if let Some(url) = &cli.url {
        return Ok(Payload::Url(url.clone()));
    }
    bail!("one of --file, --pitch or --url is required")
}

fn exit_code(phase: Phase) -> ExitCode {
    match phase {
        Phase::Completed => ExitCode::SUCCESS,
        Phase::Cancelled => ExitCode::from(130),
        _ => ExitCode::FAILURE,
    }
}
