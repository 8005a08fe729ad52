//! Long-running daemon: both scheduler intervals until SIGINT or SIGTERM.

use anyhow::Result;
use relist_core::EngineEvent;
use tokio::sync::{broadcast, watch};

use crate::app::App;

/// Runs the scheduler until a shutdown signal arrives.
///
/// # Errors
/// Returns an error if signal handlers cannot be installed or the scheduler
/// task fails.
pub async fn run_daemon(app: App) -> Result<()> {
    tracing::info!(
        database = %app.config.database.url,
        discovery_secs = app.config.scheduler.discovery_interval_secs,
        sync_secs = app.config.scheduler.sync_interval_secs,
        max_users = app.config.scheduler.max_concurrent_users,
        "starting relist daemon"
    );

    let scheduler = app.scheduler();
    let events = tokio::spawn(log_events(app.reconciler.subscribe()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    wait_for_shutdown().await?;
    let _ = shutdown_tx.send(true);

    match worker.await {
        Ok(result) => result?,
        Err(e) => tracing::error!(error = %e, "scheduler task panicked"),
    }
    events.abort();

    tracing::info!("relist daemon stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl+C, shutting down");
    Ok(())
}

/// Mirrors engine notifications into the log.
async fn log_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => log_event(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::OfferTransition {
            user_id,
            offer_id,
            from,
            to,
            ..
        } => tracing::debug!(user_id = %user_id, offer_id = %offer_id, from = ?from, to = ?to, "offer transition"),
        EngineEvent::SaleRecorded {
            user_id,
            sink_order_id,
            amount,
            ..
        } => tracing::info!(user_id = %user_id, sink_order_id = %sink_order_id, amount = %amount, "sale recorded"),
        EngineEvent::OrderFinished {
            user_id,
            order_id,
            state,
        } => tracing::info!(user_id = %user_id, order_id = %order_id, state = ?state, "order finished"),
        EngineEvent::AttentionRequired {
            user_id,
            offer_id,
            order_id,
            reason,
            ..
        } => tracing::error!(
            user_id = %user_id,
            offer_id = ?offer_id,
            order_id = ?order_id,
            reason = %reason,
            "operator attention required"
        ),
        EngineEvent::CycleCompleted {
            user_id,
            kind,
            duration_ms,
        } => tracing::debug!(user_id = %user_id, kind = %kind, duration_ms, "cycle completed"),
    }
}
