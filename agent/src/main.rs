//! Deployment agent entry point
//!
//! Configuration comes from the environment; the only flag is `--version`.

use std::env;
use std::process::ExitCode;

use anyhow::Context;

use depman::app::options::AppOptions;
use depman::app::run::run;
use depman::logs::{init_logging, LogOptions};
use depman::storage::settings::Settings;
use depman::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let version = version_info();
    if env::args().skip(1).any(|arg| arg == "--version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{json}"),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    match start(version.version).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("depman: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn start(agent_version: String) -> anyhow::Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;

    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.log_json,
    };
    if let Err(e) = init_logging(log_options) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let options = AppOptions::from_settings(&settings);
    info!("Running deployment agent with options: {:?}", options);

    run(agent_version, options, await_shutdown_signal())
        .await
        .context("failed to run the agent")
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
        info!("Ctrl+C received, shutting down...");
    }
}
