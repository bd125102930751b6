use anyhow::{Context, Result};
use clap::Parser;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use hsu_process_supervisor::{OutputSink, Process, ProcessConfig, ProcessState};

/// HSU Supervise - keep one process alive according to its config
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Process configuration file path (JSON or YAML)
    #[arg(short, long, value_name = "FILE")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    initialize_logging(args.debug)?;

    info!("Config file: {}", args.config);
    let config = ProcessConfig::load_from_file(&args.config)?;
    info!(
        "Supervising {} with restart policy {}",
        config.display_name(),
        config.restart_policy
    );

    let shutdown_signal = setup_signal_handlers()?;

    let mut running = Process::new(config)
        .with_stdout(OutputSink::Inherit)
        .with_stderr(OutputSink::Inherit)
        .run(&CancellationToken::new());

    let stop = running.stop_handle();
    tokio::spawn(async move {
        shutdown_signal.await;
        info!("Stopping supervised process...");
        stop.stop();
    });

    if let Err(e) = running.wait().await {
        error!("Supervision failed: {}", e);
        return Err(e).context("Supervisor stopped unexpectedly");
    }

    let snapshot = running.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if snapshot.status.state() == Some(ProcessState::Failed) {
        let reason = snapshot
            .status
            .last_error
            .map_or_else(|| "unknown error".to_string(), |e| e.to_string());
        anyhow::bail!("Process {} failed: {}", running.id(), reason);
    }

    info!("Process {} stopped", running.id());
    Ok(())
}

fn initialize_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Resolves on the first SIGTERM or SIGINT.
fn setup_signal_handlers() -> Result<impl Future<Output = ()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

        Ok(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT signal");
                }
            }
        })
    }

    #[cfg(not(unix))]
    {
        Ok(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C signal");
        })
    }
}
