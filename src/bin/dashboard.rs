//! chainpulse-dashboard
//!
//! Runs the observability service and transaction watcher, logging every
//! dashboard event until Ctrl-C. Positional arguments of the form
//! `network:0xhash` are registered with the watcher at startup.

use chainpulse::chain::{TransactionStatus, TransactionWatcher, TxCallback};
use chainpulse::config::ObservabilityConfig;
use chainpulse::monitoring::init_tracing;
use chainpulse::service::{DashboardEvent, ObservabilityService};
use chainpulse::Result;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ObservabilityConfig::from_env()?;
    init_tracing(&config.logger);

    let service = ObservabilityService::new(config.clone())?;
    let mut events = service.subscribe();
    service.start()?;

    let watcher = TransactionWatcher::from_config(config.watcher.clone())?;
    let (watcher, watcher_task) = watcher.spawn();

    for arg in std::env::args().skip(1) {
        let Some((network, hash)) = arg.split_once(':') else {
            warn!(arg = %arg, "Expected network:0xhash");
            continue;
        };
        let callback: TxCallback = Arc::new(|status: &TransactionStatus| {
            info!(
                tx_hash = %status.tx_hash,
                status = ?status.status,
                confirmations = status.confirmation_count,
                "Transaction finished"
            );
        });
        if !watcher.register(hash, network, Some(callback)).await {
            warn!(network, tx_hash = hash, "Transaction not registered");
        }
    }

    info!(sink = %config.sink, "Dashboard running; press Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(DashboardEvent::Metrics(snapshot)) => info!(
                    cpu_percent = snapshot.cpu_percent,
                    memory_percent = snapshot.memory_percent,
                    requests = snapshot.request_count,
                    errors = snapshot.error_count,
                    "Metrics"
                ),
                Ok(DashboardEvent::Alert(alert)) => warn!(
                    rule = %alert.rule_name,
                    severity = ?alert.severity,
                    value = alert.value,
                    "Alert: {}",
                    alert.message
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dashboard subscriber lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Shutting down");
    if let Ok(metrics) = watcher.metrics().await {
        info!(
            total = metrics.total,
            confirmed = metrics.confirmed,
            failed = metrics.failed,
            success_rate = metrics.success_rate,
            "Transaction summary"
        );
    }
    watcher.shutdown().await;
    if let Err(e) = watcher_task.await {
        error!(error = %e, "Watcher task failed");
    }
    service.shutdown().await;
    Ok(())
}
