//! reencrypt - re-seal every SealedSecret under the controller's current key

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sealed_reencrypt::config::{Cli, RunConfig};
use sealed_reencrypt::controller::Reconciler;
use sealed_reencrypt::telemetry::init_logging;
use sealed_reencrypt::{EXIT_FATAL, EXIT_USAGE};

#[tokio::main]
async fn main() -> ExitCode {
    // Install crypto provider - FIPS-validated aws-lc-rs
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        return ExitCode::from(EXIT_FATAL);
    }

    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if let Err(e) = init_logging(&config.log) {
        eprintln!("error: {e}");
        return ExitCode::from(EXIT_FATAL);
    }

    let cancel = CancellationToken::new();
    spawn_cancel_triggers(&config, cancel.clone());

    match run(&config, &cancel).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "Run aborted");
            eprintln!("error: {e}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(config: &RunConfig, cancel: &CancellationToken) -> sealed_reencrypt::Result<u8> {
    let reconciler = Reconciler::from_config(config).await?;
    let summary = reconciler.run(config, cancel).await?;

    print!(
        "{}",
        reconciler.reporter().summarize(&summary).render(config.output)
    );
    Ok(summary.exit_code())
}

/// Cancel the run on Ctrl-C or when the configured timeout elapses
fn spawn_cancel_triggers(config: &RunConfig, cancel: CancellationToken) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight items");
            on_signal.cancel();
        }
    });

    if let Some(timeout) = config.timeout {
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    info!(timeout_secs = timeout.as_secs(), "Timeout reached, no new items will start");
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        });
    }
}
