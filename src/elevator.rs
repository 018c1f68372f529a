//! Elevator state shared by the connection handlers and the retraining task.
//!
//! The whole state lives in one immutable [`Cabin`] snapshot behind an
//! [`ArcSwap`]. Every mutation builds a new snapshot from the current one and
//! swaps it in with a compare-and-swap loop, so concurrent demands never lose
//! an update and readers always see a complete snapshot. No lock is held
//! across an `.await`.

use crate::features::FeatureExtractor;
use crate::predictor::Model;
use crate::store::{DemandStore, StoreError};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};

use std::sync::Arc;

/// One consistent view of the elevator.
#[derive(Debug, Clone)]
pub struct Cabin {
    pub floor: i64,
    pub vacant: bool,
    pub resting: bool,
    /// Absent until the first successful retrain.
    pub predictor: Option<Arc<Model>>,
}

/// Outcome of a resting-floor query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prediction {
    Floor(i64),
    /// Occupied or moving; resting position is irrelevant.
    InUse,
    /// No predictor has been trained yet.
    Untrained,
}

pub struct Elevator {
    cabin: ArcSwap<Cabin>,
    store: DemandStore,
    extractor: Arc<FeatureExtractor>,
}

impl Elevator {
    /// A vacant, resting elevator at `initial_floor` with no predictor.
    pub fn new(store: DemandStore, initial_floor: i64) -> Self {
        let extractor = store.extractor().clone();
        Self {
            cabin: ArcSwap::from_pointee(Cabin {
                floor: initial_floor,
                vacant: true,
                resting: true,
                predictor: None,
            }),
            store,
            extractor,
        }
    }

    pub fn snapshot(&self) -> Arc<Cabin> {
        self.cabin.load_full()
    }

    pub fn current_floor(&self) -> i64 {
        self.cabin.load().floor
    }

    /// Record a demand and move the elevator to its floor.
    ///
    /// The floor is updated even if persisting the record fails; the store
    /// error is returned for the caller to log.
    pub async fn apply_demand(
        &self,
        floor: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let recorded = self.store.insert(floor, timestamp).await;

        self.cabin.rcu(|cabin| Cabin {
            floor,
            ..Cabin::clone(cabin)
        });
        tracing::debug!(floor, "elevator moved to demanded floor");

        recorded
    }

    /// Best resting floor at `timestamp`, if the elevator is idle and trained.
    ///
    /// Vacancy, resting flag and predictor are all read from one snapshot,
    /// so a concurrent retrain never mixes into a single answer.
    pub fn predict_resting_floor(&self, timestamp: DateTime<Utc>) -> Prediction {
        let cabin = self.cabin.load_full();

        if !(cabin.vacant && cabin.resting) {
            return Prediction::InUse;
        }
        let Some(model) = cabin.predictor.as_ref() else {
            return Prediction::Untrained;
        };

        let features = self.extractor.extract(&timestamp);
        if features.len() != model.dimension() {
            tracing::warn!(
                expected = model.dimension(),
                found = features.len(),
                "feature vector does not match installed predictor"
            );
            return Prediction::Untrained;
        }

        Prediction::Floor(model.predict(&features))
    }

    /// Replace the active predictor.
    pub fn install_predictor(&self, model: Model) {
        tracing::debug!(kind = %model.kind(), dimension = model.dimension(), "installing predictor");
        let model = Arc::new(model);
        self.cabin.rcu(|cabin| Cabin {
            predictor: Some(model.clone()),
            ..Cabin::clone(cabin)
        });
    }

    pub fn set_occupancy(&self, vacant: bool, resting: bool) {
        self.cabin.rcu(|cabin| Cabin {
            vacant,
            resting,
            ..Cabin::clone(cabin)
        });
    }
}

impl std::fmt::Debug for Elevator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Elevator")
            .field("cabin", &self.cabin.load_full())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::{ModelConfig, train};
    use chrono::TimeZone;

    async fn setup(dir: &tempfile::TempDir) -> Arc<Elevator> {
        let store = DemandStore::connect(&dir.path().join("demands.db"), FeatureExtractor::default())
            .await
            .unwrap();
        Arc::new(Elevator::new(store, 0))
    }

    fn monday(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, hour, 0, 0).single().unwrap()
    }

    fn lobby_or_top(lobby: i64, top: i64) -> Model {
        let features = vec![vec![8.0, 0.0], vec![9.0, 0.0], vec![18.0, 0.0], vec![19.0, 0.0]];
        train(&ModelConfig::default(), &features, &[lobby, lobby, top, top]).unwrap()
    }

    #[tokio::test]
    async fn new_elevator_is_vacant_resting_and_untrained() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;

        let cabin = elevator.snapshot();
        assert_eq!(cabin.floor, 0);
        assert!(cabin.vacant && cabin.resting);
        assert!(cabin.predictor.is_none());
        assert_eq!(elevator.predict_resting_floor(monday(8)), Prediction::Untrained);
    }

    #[tokio::test]
    async fn demand_moves_elevator_and_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;

        elevator.apply_demand(4, monday(10)).await.unwrap();

        assert_eq!(elevator.current_floor(), 4);
        assert_eq!(elevator.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_demands_are_neither_lost_nor_fabricated() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;
        let floors: Vec<i64> = (1..=40).collect();

        let mut tasks = tokio::task::JoinSet::new();
        for floor in floors.clone() {
            let elevator = elevator.clone();
            tasks.spawn(async move { elevator.apply_demand(floor, Utc::now()).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        assert!(floors.contains(&elevator.current_floor()));
        assert_eq!(elevator.store.count().await.unwrap(), floors.len() as u64);
    }

    #[tokio::test]
    async fn occupied_or_moving_elevator_gets_no_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;
        elevator.install_predictor(lobby_or_top(0, 9));

        elevator.set_occupancy(false, true);
        assert_eq!(elevator.predict_resting_floor(monday(8)), Prediction::InUse);

        elevator.set_occupancy(true, false);
        assert_eq!(elevator.predict_resting_floor(monday(8)), Prediction::InUse);

        elevator.set_occupancy(true, true);
        assert_eq!(elevator.predict_resting_floor(monday(8)), Prediction::Floor(0));
    }

    #[tokio::test]
    async fn installed_predictor_answers_consistently_until_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;

        elevator.install_predictor(lobby_or_top(0, 9));
        let first = elevator.predict_resting_floor(monday(19));
        assert_eq!(first, Prediction::Floor(9));
        assert_eq!(elevator.predict_resting_floor(monday(19)), first);

        elevator.install_predictor(lobby_or_top(1, 5));
        assert_eq!(elevator.predict_resting_floor(monday(19)), Prediction::Floor(5));
    }

    #[tokio::test]
    async fn installing_predictor_keeps_floor_and_occupancy() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;
        elevator.apply_demand(6, monday(12)).await.unwrap();
        elevator.set_occupancy(false, false);

        elevator.install_predictor(lobby_or_top(0, 9));

        let cabin = elevator.snapshot();
        assert_eq!(cabin.floor, 6);
        assert!(!cabin.vacant && !cabin.resting);
        assert!(cabin.predictor.is_some());
    }

    #[tokio::test]
    async fn store_failure_still_moves_elevator() {
        let dir = tempfile::tempdir().unwrap();
        let elevator = setup(&dir).await;
        elevator.store.close().await;

        let result = elevator.apply_demand(3, monday(9)).await;

        assert!(result.is_err());
        assert_eq!(elevator.current_floor(), 3);
    }
}
