//! Explicit supervisor owning the maintenance ticker, the progress-hub
//! pruner, and the ingest worker pool's shutdown — generalized from the
//! teacher's `StartupHooks` periodic-interval pattern into a single
//! process-lifetime owner, per the spec's own design note calling for this
//! shape.

use std::time::Duration;

use tokio::time::interval;
use tracing::info;

use crate::state::AppState;

const PRUNE_TICK: Duration = Duration::from_secs(30);

pub fn spawn(state: AppState) {
    spawn_maintenance_ticker(state.clone());
    spawn_progress_pruner(state);
}

fn spawn_maintenance_ticker(state: AppState) {
    tokio::spawn(async move {
        let mut temp_tick = interval(state.config.temp_sweep_period);
        let mut batch_tick = interval(state.config.batch_expiry_period);
        let mut session_tick = interval(state.config.session_expiry_period);
        // First ticks fire immediately; skip them so startup doesn't race
        // recovery for the store root.
        temp_tick.tick().await;
        batch_tick.tick().await;
        session_tick.tick().await;

        loop {
            tokio::select! {
                _ = temp_tick.tick() => {
                    let n = crate::maintenance::sweep_temp_uploads(&state.store, state.config.temp_age);
                    info!(cleaned = n, "temp sweep complete");
                }
                _ = batch_tick.tick() => {
                    let (cleaned, pending_cleaned) =
                        crate::maintenance::expire_batches(&state.tracker, state.maintenance_config()).await;
                    info!(cleaned, pending_cleaned, "batch expiry sweep complete");
                }
                _ = session_tick.tick() => {
                    let n = crate::maintenance::expire_sessions(&state.sessions);
                    info!(cleaned = n, "session expiry sweep complete");
                }
            }
        }
    });
}

fn spawn_progress_pruner(state: AppState) {
    tokio::spawn(async move {
        let mut tick = interval(PRUNE_TICK);
        loop {
            tick.tick().await;
            state.progress.prune();
        }
    });
}

pub async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
