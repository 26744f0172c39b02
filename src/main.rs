//! Courier notification delivery runner.
//!
//! Processes one queue batch per invocation: reads the queue event JSON from
//! a file or stdin, delivers every record, and writes the partial batch
//! response to stdout so the queue redelivers only the failed records.

mod config;
mod telemetry;

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use courier_core::{QueueEvent, RealClock};
use courier_delivery::{BatchProcessor, DeliveryClient};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    telemetry::init_tracing(config.log_format, &config.rust_log)?;

    let invocation_id = Uuid::new_v4();
    run(config).instrument(info_span!("invocation", %invocation_id)).await
}

async fn run(config: Config) -> Result<()> {
    info!(
        endpoint_parameter = %config.endpoint_parameter,
        api_key_parameter = %config.api_key_parameter,
        max_attempts = config.max_attempts,
        retry_on = ?config.retry_on,
        invocation_timeout_seconds = config.invocation_timeout_seconds,
        "Configuration loaded"
    );

    let event = read_event(config.event_file.as_deref()).await?;

    let client = DeliveryClient::new(config.to_client_config())
        .context("Failed to build delivery HTTP client")?;
    let processor = BatchProcessor::new(
        Arc::new(client),
        config.parameter_store(),
        config.to_processor_config(),
        Arc::new(RealClock::new()),
    );

    let watchdog = tokio::spawn(cancel_on_deadline(
        processor.cancellation_token(),
        config.invocation_timeout(),
    ));

    let report = processor.process_event(&event).await;
    watchdog.abort();

    let response = serde_json::to_string(&report.to_batch_response())
        .context("Failed to encode batch response")?;
    println!("{response}");

    info!(
        batch_size = report.len(),
        delivered = report.delivered_count(),
        failed = report.failed_count(),
        "Invocation complete"
    );
    Ok(())
}

/// Reads the queue event from `path`, or from stdin when no path is set.
async fn read_event(path: Option<&Path>) -> Result<QueueEvent> {
    let raw = match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read event file {}", path.display()))?,
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("Failed to read event from stdin")?;
            raw
        },
    };

    let event: QueueEvent = serde_json::from_str(&raw).context("Invalid queue event")?;
    info!(batch_size = event.records.len(), "Queue event received");
    Ok(event)
}

/// Cancels `token` when the invocation budget runs out or the process is
/// asked to stop.
async fn cancel_on_deadline(token: CancellationToken, budget: Duration) {
    tokio::select! {
        () = tokio::time::sleep(budget) => {
            warn!(
                budget_seconds = budget.as_secs(),
                "Invocation budget exhausted, abandoning batch"
            );
        },
        () = shutdown_signal() => {
            warn!("Shutdown signal received, abandoning batch");
        },
    }
    token.cancel();
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
