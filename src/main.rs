//! Ployer - Entry Point
//!
//! Single long-running service that turns git repositories into running,
//! TLS-terminated HTTP applications.

use std::env;

use tracing::{error, info};

use ployer::app::run::run;
use ployer::config::Config;
use ployer::logs::init_logging;
use ployer::utils::version_info;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-V") {
        let version = version_info();
        println!("{}", serde_json::to_string_pretty(&version).unwrap_or(version.version));
        return;
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = init_logging(&config.log_format) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    info!("Starting Ployer {}", version_info().version);

    if let Err(e) = run(config, await_shutdown_signal()).await {
        error!("Ployer exited with error: {}", e);
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
