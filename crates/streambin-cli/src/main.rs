mod app;
mod config;

use std::process::ExitCode;
use std::time::Instant;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::app::AppBuilder;
use crate::config::{Cli, Settings};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = match Settings::resolve(cli) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(1);
        }
    };

    let app = match AppBuilder::new().build(settings) {
        Ok(app) => app,
        Err(e) => {
            error!(error = ?e, "Failed to initialize");
            return ExitCode::from(1);
        }
    };

    info!("Starting");
    let started = Instant::now();
    match app.run().await {
        Ok(stats) => {
            info!(
                files = stats.processed_files,
                records = stats.processed_records,
                seconds = started.elapsed().as_secs_f64(),
                "Done"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = ?e, "Processing failed");
            ExitCode::from(1)
        }
    }
}
