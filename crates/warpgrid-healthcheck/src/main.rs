//! healthcheck — probes a WarpGrid instance from inside its container.
//!
//! Prints exactly one line (`healthcheck passed` or
//! `healthcheck failed: <reason>`) on stdout and exits with the code of
//! the outcome. Diagnostics go to stderr, filtered by `RUST_LOG`.
//!
//! # Usage
//!
//! ```text
//! healthcheck --port 8080 --timeout 1s
//! healthcheck --uri /healthz --startup-interval 2s --startup-timeout 60s
//! healthcheck --uri /healthz --liveness-interval 30s
//! ```

use std::process::ExitCode;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use warpgrid_health::{HealthCheck, Monitor};

mod config;

use config::{Cli, PORT_MAPPINGS_ENV};

/// Exit code for invalid configuration, matching clap's usage errors.
const CONFIG_ERROR: u8 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let port_mappings = std::env::var(PORT_MAPPINGS_ENV).ok();

    let settings = match cli.into_settings(port_mappings.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("healthcheck: {e:#}");
            return ExitCode::from(CONFIG_ERROR);
        }
    };

    info!(
        mode = settings.mode.name(),
        port = settings.probe.port(),
        uri = settings.probe.uri(),
        "healthcheck starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let monitor = Monitor::new(HealthCheck::new(settings.probe), settings.mode);
    let result = monitor.run(shutdown_rx).await;

    println!("{}", result.message);
    ExitCode::from(result.exit_code)
}

/// Resolves on SIGINT or SIGTERM. Never resolves if no handler can be installed.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
}
