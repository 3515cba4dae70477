//! Background tick loop.
//!
//! Every `interval`, or as soon as a handler signals `AppState::wake`, the
//! scheduler resumes due runs. Each run is driven on its own blocking thread,
//! at most `AppState::drives` at once, so a slow notification destination only
//! holds up its own run. The loop owns no state of its own; everything it
//! needs is in the run store.

use chrono::Utc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error};

use crate::state::AppState;

/// Drive every run due now and wait for those drives to finish. Returns how
/// many runs were driven.
pub async fn run_tick(state: &AppState) -> anyhow::Result<usize> {
    let runtime = state.runtime.clone();
    let due = tokio::task::spawn_blocking(move || runtime.due(Utc::now())).await??;

    let mut drives = JoinSet::new();
    for subscription_id in due {
        drives.spawn(drive(state.clone(), subscription_id));
    }

    let mut count = 0;
    while let Some(joined) = drives.join_next().await {
        if joined?? {
            count += 1;
        }
    }
    Ok(count)
}

/// Drive one due run on a blocking thread once a permit is free. A failed
/// drive is logged and counts as not driven.
async fn drive(state: AppState, subscription_id: String) -> anyhow::Result<bool> {
    let _permit = state.drives.clone().acquire_owned().await?;
    let runtime = state.runtime.clone();
    let id = subscription_id.clone();
    let driven = tokio::task::spawn_blocking(move || runtime.resume(&id, Utc::now())).await?;
    match driven {
        Ok(record) => Ok(record.is_some()),
        Err(e) => {
            error!(subscription_id = %subscription_id, error = %e, "failed to drive run");
            Ok(false)
        }
    }
}

/// Start the tick loop. Each tick runs as its own task, so a long drive never
/// delays the next tick; a run already being driven is not claimed twice.
pub fn spawn(state: AppState, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = state.wake.notified() => {}
            }
            let tick_state = state.clone();
            tokio::spawn(async move {
                match run_tick(&tick_state).await {
                    Ok(0) => {}
                    Ok(n) => debug!(driven = n, "scheduler tick"),
                    Err(e) => error!(error = %e, "scheduler tick failed"),
                }
            });
        }
    })
}
