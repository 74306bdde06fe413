use std::process::ExitCode;

use clap::Parser;
use cloudrelay::{Application, Config, config::Args, telemetry};
use tokio::signal;

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler, relying on Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Ctrl+C handler failed: {}", e);
            }
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Outbound provider clients use rustls; pick the crypto backend before any are built
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let args = Args::parse();

    // Missing credentials stop the process here, before anything binds
    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cloudrelay: invalid configuration: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    if args.validate {
        println!("Configuration is valid.");
        return Ok(ExitCode::SUCCESS);
    }

    telemetry::init_telemetry(config.enable_otel_export, config.log_format)?;
    tracing::debug!("{:?}", args);

    Application::new(config).await?.serve(shutdown_signal()).await?;
    Ok(ExitCode::SUCCESS)
}
