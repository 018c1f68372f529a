//! Retraining loop: rebuild the predictor from the full demand history.

use crate::elevator::Elevator;
use crate::error::Result;
use crate::orchestrator::wait_for_shutdown;
use crate::predictor::{self, ModelConfig};
use crate::store::DemandStore;

use anyhow::Context as _;
use tokio::sync::watch;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Summary of one successful retraining pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrainReport {
    pub samples: usize,
    /// Distinct floors in the training set.
    pub floors: usize,
}

/// Spawn the retraining loop.
///
/// With `run_immediately`, the first pass happens at startup instead of after
/// the first interval.
pub fn spawn_retrain_loop(
    elevator: Arc<Elevator>,
    store: DemandStore,
    model: ModelConfig,
    interval: Duration,
    run_immediately: bool,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run_retrain_loop(&elevator, &store, model, interval, run_immediately, shutdown).await;
    })
}

async fn run_retrain_loop(
    elevator: &Elevator,
    store: &DemandStore,
    model: ModelConfig,
    interval: Duration,
    run_immediately: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(interval_secs = interval.as_secs(), kind = %model.kind, "retrain loop started");

    if run_immediately {
        retrain_logged(elevator, store, &model).await;
    }

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            _ = tokio::time::sleep(interval) => {}
        }
        retrain_logged(elevator, store, &model).await;
    }

    tracing::info!("retrain loop stopped");
}

async fn retrain_logged(elevator: &Elevator, store: &DemandStore, model: &ModelConfig) {
    match run_retrain_cycle(elevator, store, model).await {
        Ok(report) => {
            tracing::info!(samples = report.samples, floors = report.floors, "predictor retrained");
        }
        Err(error) => {
            tracing::warn!(%error, "retraining skipped, keeping previous predictor");
        }
    }
}

/// Run one retraining pass.
///
/// Reads the whole history, fits a new model on the blocking pool and installs
/// it. On any error the currently installed predictor is left untouched.
pub async fn run_retrain_cycle(
    elevator: &Elevator,
    store: &DemandStore,
    model: &ModelConfig,
) -> Result<RetrainReport> {
    let set = store.extract_all().await?;
    let report = RetrainReport {
        samples: set.len(),
        floors: set.labels.iter().collect::<BTreeSet<_>>().len(),
    };

    let config = *model;
    let trained = tokio::task::spawn_blocking(move || {
        predictor::train(&config, &set.features, &set.labels)
    })
    .await
    .context("training task failed")??;

    elevator.install_predictor(trained);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevator::Prediction;
    use crate::features::FeatureExtractor;
    use crate::error::Error;
    use crate::predictor::TrainingError;

    use chrono::{DateTime, TimeZone, Utc};

    async fn setup(dir: &tempfile::TempDir) -> (Arc<Elevator>, DemandStore) {
        let store = DemandStore::connect(&dir.path().join("demands.db"), FeatureExtractor::default())
            .await
            .unwrap();
        (Arc::new(Elevator::new(store.clone(), 0)), store)
    }

    fn monday(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, hour, 0, 0).single().unwrap()
    }

    async fn seed_morning_evening(store: &DemandStore) {
        for hour in [7, 8, 9] {
            store.insert(0, monday(hour)).await.unwrap();
        }
        for hour in [18, 19, 20] {
            store.insert(6, monday(hour)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn successful_cycle_installs_predictor() {
        let dir = tempfile::tempdir().unwrap();
        let (elevator, store) = setup(&dir).await;
        seed_morning_evening(&store).await;

        let report = run_retrain_cycle(&elevator, &store, &ModelConfig::default())
            .await
            .unwrap();

        assert_eq!(report, RetrainReport { samples: 6, floors: 2 });
        assert_eq!(elevator.predict_resting_floor(monday(8)), Prediction::Floor(0));
        assert_eq!(elevator.predict_resting_floor(monday(19)), Prediction::Floor(6));
    }

    #[tokio::test]
    async fn failed_cycle_keeps_previous_predictor() {
        let dir = tempfile::tempdir().unwrap();
        let (elevator, store) = setup(&dir).await;
        seed_morning_evening(&store).await;
        run_retrain_cycle(&elevator, &store, &ModelConfig::default())
            .await
            .unwrap();
        let before = elevator.predict_resting_floor(monday(19));

        // Only one distinct floor left in history.
        store.reset().await.unwrap();
        store.insert(4, monday(10)).await.unwrap();
        store.insert(4, monday(11)).await.unwrap();
        let error = run_retrain_cycle(&elevator, &store, &ModelConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            Error::Training(TrainingError::SingleFloor { floor: 4 })
        ));
        assert_eq!(elevator.predict_resting_floor(monday(19)), before);
    }

    #[tokio::test]
    async fn empty_history_leaves_elevator_untrained() {
        let dir = tempfile::tempdir().unwrap();
        let (elevator, store) = setup(&dir).await;

        let error = run_retrain_cycle(&elevator, &store, &ModelConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Training(TrainingError::Empty)));
        assert_eq!(elevator.predict_resting_floor(monday(8)), Prediction::Untrained);
    }

    #[tokio::test]
    async fn loop_trains_at_startup_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (elevator, store) = setup(&dir).await;
        seed_morning_evening(&store).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_retrain_loop(
            elevator.clone(),
            store,
            ModelConfig::default(),
            Duration::from_secs(3600),
            true,
            shutdown_rx,
        );

        let mut trained = false;
        for _ in 0..200 {
            if elevator.snapshot().predictor.is_some() {
                trained = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(trained);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
