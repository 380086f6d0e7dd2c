mod cli;
mod platform;

use std::process::ExitCode;

use clap::Parser;
use tracker_logging::tracker_error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    if let Some(destination) = cli.log_destination() {
        platform::logging::initialize(destination, cli.verbose);
    }

    match platform::run_app(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracker_error!("{:#}", err);
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
