//! Crash engine binary
//!
//! Runs the round engine with its HTTP/WebSocket API, or helps set it up.

use clap::{Parser, Subcommand};
use crash_engine::{
    api::ApiServer,
    config::{ConfigLoader, EngineConfig},
    services::ServiceBuilder,
    settlement::ClaimSigner,
    shutdown::stop_pair,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Crash game round engine
#[derive(Parser)]
#[command(name = "crash-engine")]
#[command(about = "Provably fair crash game round engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Override storage.data_directory
    #[arg(short, long)]
    data_dir: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine and API server
    Run {
        /// Operator drives rounds through the API instead of the automatic loop
        #[arg(long)]
        manual: bool,

        /// Keep everything in memory
        #[arg(long)]
        in_memory: bool,
    },

    /// Write a configuration file
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "crash.toml")]
        output: PathBuf,

        /// Start from the production preset
        #[arg(long)]
        production: bool,
    },

    /// Generate a claim signing key
    GenerateKey,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_directory = dir;
    }

    let filter = if cli.verbose {
        EnvFilter::new("crash_engine=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.monitoring.log_filter))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run { manual, in_memory } => {
            if in_memory {
                config.storage.in_memory = true;
            }
            run(config, manual).await
        }
        Commands::InitConfig { output, production } => {
            let config = if production { EngineConfig::production() } else { config };
            ConfigLoader::save(&config, &output.to_string_lossy())?;
            info!(path = %output.display(), "Configuration written");
            Ok(())
        }
        Commands::GenerateKey => {
            let signer = ClaimSigner::generate();
            println!("claim_signing_key = \"{}\"", signer.secret_hex());
            println!("# signer public key: {}", signer.signer_hex());
            Ok(())
        }
    }
}

async fn run(config: EngineConfig, manual: bool) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        manual,
        in_memory = config.storage.in_memory,
        data_dir = %config.storage.data_directory,
        betting_secs = config.game.betting_duration_secs,
        max_multiplier = %config.game.max_multiplier,
        "Starting crash engine"
    );

    let services = Arc::new(ServiceBuilder::new(config.clone()).build()?);
    if let Some(round) = services.scheduler.recover()? {
        info!(round_number = round.round_number, status = %round.status, "Recovered open round");
    }

    let (stop, token) = stop_pair();
    let mut tasks = Vec::new();
    if manual {
        info!("Manual mode: rounds advance only through operator calls");
    } else {
        tasks.push(tokio::spawn(services.scheduler.clone().run(stop.token())));
    }
    tasks.push(tokio::spawn(services.recovery.clone().run(stop.token())));
    tasks.push(tokio::spawn(services.reconciler.clone().run_balance_sync(
        Duration::from_secs(config.settlement.balance_sync_interval_secs),
        stop.token(),
    )));

    let server = ApiServer::new(config.api.clone(), services.clone());
    let mut server_task = tokio::spawn(server.run(token));

    tokio::select! {
        _ = shutdown_signal() => {}
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => warn!("API server exited"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
        }
    }

    stop.stop();
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Background task panicked");
        }
    }
    if !server_task.is_finished() {
        let _ = server_task.await;
    }
    info!("Crash engine stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
