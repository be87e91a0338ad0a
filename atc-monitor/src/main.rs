//! CLI host for the voice/surveillance fusion monitor (§6).

mod channel;
mod cli;
mod monitor;
mod stub_model;

use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, Parser};
use tracing::{error, info};

use cli::Cli;
use monitor::Monitor;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atc_monitor=info,atc_core=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    if !cli.monitor {
        let _ = Cli::command().print_help();
        println!();
        return;
    }

    if cli.system_audio {
        info!("--system-audio was requested; this core only supports remote stream sources, ignoring");
    }

    let duration = cli.duration;
    let config = cli.into_config();

    info!(
        num_channels = config.channels_config.len(),
        enable_adsb = config.enable_adsb,
        enable_llm_correlation = config.enable_llm_correlation,
        "starting atc-monitor"
    );

    let monitor = Monitor::new(config, PathBuf::from("recordings"), PathBuf::from("transcripts"));

    if let Err(e) = monitor.start().await {
        error!(error = %e, "monitor failed to start");
        std::process::exit(1);
    }

    match duration {
        Some(secs) => {
            info!(seconds = secs, "running for fixed duration");
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
        None => {
            info!("running until interrupted (Ctrl-C)");
            let _ = tokio::signal::ctrl_c().await;
        }
    }

    monitor.shutdown().await;
    info!("atc-monitor exited cleanly");
}
