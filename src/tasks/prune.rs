//! Pruning loop: drop demands older than the retention window.

use crate::error::Result;
use crate::orchestrator::wait_for_shutdown;
use crate::store::DemandStore;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use std::time::Duration;

pub fn spawn_prune_loop(
    store: DemandStore,
    interval: Duration,
    retention: Duration,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run_prune_loop(&store, interval, retention, shutdown).await;
    })
}

async fn run_prune_loop(
    store: &DemandStore,
    interval: Duration,
    retention: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        retention_secs = retention.as_secs(),
        "prune loop started"
    );

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match run_prune_cycle(store, retention, Utc::now()).await {
            Ok(0) => tracing::debug!("no expired demands to prune"),
            Ok(removed) => tracing::info!(removed, "pruned expired demands"),
            Err(error) => tracing::warn!(%error, "pruning failed, will retry next interval"),
        }
    }

    tracing::info!("prune loop stopped");
}

/// Delete every demand older than `now - retention`. Returns how many were removed.
pub async fn run_prune_cycle(
    store: &DemandStore,
    retention: Duration,
    now: DateTime<Utc>,
) -> Result<u64> {
    let cutoff = chrono::Duration::from_std(retention)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .with_context(|| {
            format!(
                "retention window of {}s reaches past the earliest representable time",
                retention.as_secs()
            )
        })?;
    Ok(store.prune_older_than(cutoff).await?)
}
