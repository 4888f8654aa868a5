//! Ethoscope Backup - Main entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use etho_backup::{
    config::BackupConfig,
    discovery::{DeviceScanner, NodeDirectory, ProbeScanner},
    jobs::{DatabaseJobFactory, JobFactory, MySqlConnector, VideoJobFactory},
    orchestrator::FleetOrchestrator,
    server,
    status::StatusBoard,
};
use etho_common::logging::{init_logging, LogConfig, LogLevel};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "etho-backup", version, about = "Back up ethoscope databases and videos")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Root directory of the database mirrors
    #[arg(long, global = true, env = "ETHO_RESULTS_DIR")]
    results_dir: Option<PathBuf>,

    /// Root directory of the video archive
    #[arg(long, global = true, env = "ETHO_VIDEO_DIR")]
    video_dir: Option<PathBuf>,

    /// Address of the node serving the device directory
    #[arg(long, global = true, env = "ETHO_NODE_ADDRESS")]
    node: Option<String>,

    /// Port of the status endpoint
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Maximum number of concurrent backups
    #[arg(long, global = true)]
    max_workers: Option<usize>,

    /// Back up only this device (id or name) once and exit; repeatable
    #[arg(long = "device", global = true)]
    devices: Vec<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Mirror device databases
    Db,
    /// Copy recorded videos
    Video,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let prefix = match cli.command {
        Command::Db => "etho-backup-db",
        Command::Video => "etho-backup-video",
    };
    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(level)
        .log_file_prefix(prefix)
        .filter_directives("etho_backup=debug,etho_common=info,tower_http=info,sqlx=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialise logging: {e}");
            None
        },
    };

    if let Err(e) = run(cli).await {
        error!(error = %e, "Backup service failed");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = BackupConfig::from_env()?;
    if let Some(dir) = cli.results_dir {
        config.paths.results_dir = dir;
    }
    if let Some(dir) = cli.video_dir {
        config.paths.video_dir = dir;
    }
    if let Some(node) = cli.node {
        config.orchestrator.node_address = node;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(workers) = cli.max_workers {
        config.orchestrator.max_workers = workers;
    }
    config.validate()?;

    let factory: Arc<dyn JobFactory> = match cli.command {
        Command::Db => Arc::new(DatabaseJobFactory::new(
            config.paths.results_dir.clone(),
            config.replication.clone(),
            Arc::new(MySqlConnector::new(config.source.clone())),
        )),
        Command::Video => Arc::new(VideoJobFactory::new(
            config.paths.video_dir.clone(),
            config.video.clone(),
        )),
    };

    info!(
        kind = %factory.kind(),
        node = %config.orchestrator.node_address,
        results_dir = %config.paths.results_dir.display(),
        video_dir = %config.paths.video_dir.display(),
        "Starting ethoscope backup"
    );

    let directory = NodeDirectory::new(
        &config.orchestrator.node_address,
        config.orchestrator.directory_timeout(),
    )?;
    let cancel = CancellationToken::new();
    let status = Arc::new(StatusBoard::new());

    let mut orchestrator =
        FleetOrchestrator::new(config.orchestrator.clone(), Arc::new(directory), factory)
            .with_status(Arc::clone(&status))
            .with_cancellation(cancel.clone());

    if !config.orchestrator.scan_hosts.is_empty() {
        let scanner: Arc<dyn DeviceScanner> = Arc::new(ProbeScanner::new(
            config.orchestrator.scan_hosts.clone(),
            config.video.device_port,
            config.video.request_timeout(),
        )?);
        orchestrator = orchestrator.with_scanner(scanner);
    }

    if !cli.devices.is_empty() {
        let outcome = orchestrator.run_once(&cli.devices).await;
        info!(
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            timed_out = outcome.timed_out,
            "One-shot backup finished"
        );
        let requested = outcome.submitted.max(cli.devices.len());
        if outcome.succeeded < requested {
            anyhow::bail!(
                "{} of {} requested backups did not succeed",
                requested - outcome.succeeded,
                requested
            );
        }
        return Ok(());
    }

    let server_task = if config.server.enabled {
        let server_config = config.server.clone();
        let status = Arc::clone(&status);
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server::serve(&server_config, status, cancel).await {
                error!(error = %e, "Status server failed");
            }
        }))
    } else {
        None
    };

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        });
    }

    orchestrator.run().await;

    if let Some(task) = server_task {
        task.await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping after the current cycle"),
        _ = terminate => info!("Received terminate signal, stopping after the current cycle"),
    }
}
