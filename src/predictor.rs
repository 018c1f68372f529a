//! Floor classifiers trained on demand history.
//!
//! [`train`] fits a [`Model`] from parallel feature/label sequences. A trained
//! model is immutable: retraining always builds a new one, which the elevator
//! swaps in whole.

use crate::features::FeatureVector;

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrainingError {
    #[error("no demand history to train on")]
    Empty,

    #[error("{features} feature vectors but {labels} floor labels")]
    LengthMismatch { features: usize, labels: usize },

    #[error("feature vector {index} has {found} values, expected {expected}")]
    RaggedFeatures {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("feature vector {index} contains a non-finite value")]
    NonFinite { index: usize },

    #[error("every demand is for floor {floor}; at least two distinct floors are needed")]
    SingleFloor { floor: i64 },
}

/// Which classifier [`train`] builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Majority vote among the k nearest training samples.
    NearestNeighbors,
    /// Closest per-floor mean.
    NearestCentroid,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::NearestNeighbors => "nearest_neighbors",
            ModelKind::NearestCentroid => "nearest_centroid",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ModelConfig {
    pub kind: ModelKind,
    /// k for [`ModelKind::NearestNeighbors`]; ignored otherwise.
    pub neighbors: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::NearestNeighbors,
            neighbors: 5,
        }
    }
}

/// Per-column min-max scaling learned from the training set.
#[derive(Debug, Clone, PartialEq)]
struct Scaling {
    min: Vec<f64>,
    span: Vec<f64>,
}

impl Scaling {
    fn fit(features: &[FeatureVector], dimension: usize) -> Self {
        let mut min = vec![f64::INFINITY; dimension];
        let mut max = vec![f64::NEG_INFINITY; dimension];
        for vector in features {
            for (column, value) in vector.iter().enumerate() {
                min[column] = min[column].min(*value);
                max[column] = max[column].max(*value);
            }
        }
        // Constant columns keep a unit span so they scale to zero.
        let span = min
            .iter()
            .zip(&max)
            .map(|(low, high)| if high > low { high - low } else { 1.0 })
            .collect();
        Self { min, span }
    }

    fn apply(&self, vector: &[f64]) -> Vec<f64> {
        vector
            .iter()
            .zip(self.min.iter().zip(&self.span))
            .map(|(value, (min, span))| (value - min) / span)
            .collect()
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[derive(Debug, Clone, PartialEq)]
pub struct NeighborModel {
    k: usize,
    scaling: Scaling,
    samples: Vec<(Vec<f64>, i64)>,
}

impl NeighborModel {
    fn predict(&self, features: &[f64]) -> i64 {
        let query = self.scaling.apply(features);

        let mut ranked: Vec<(f64, usize)> = self
            .samples
            .iter()
            .enumerate()
            .map(|(index, (sample, _))| (squared_distance(sample, &query).sqrt(), index))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        // floor -> (votes, summed distance)
        let mut tally: BTreeMap<i64, (usize, f64)> = BTreeMap::new();
        for (distance, index) in ranked.into_iter().take(self.k) {
            let entry = tally.entry(self.samples[index].1).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += distance;
        }

        // BTreeMap iterates floors ascending, so the strict comparisons below
        // leave the lowest floor in place on a full tie.
        let mut best: Option<(i64, usize, f64)> = None;
        for (floor, (votes, distance)) in tally {
            let better = match best {
                None => true,
                Some((_, best_votes, best_distance)) => {
                    votes > best_votes || (votes == best_votes && distance < best_distance)
                }
            };
            if better {
                best = Some((floor, votes, distance));
            }
        }
        best.map(|(floor, _, _)| floor).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CentroidModel {
    scaling: Scaling,
    centroids: BTreeMap<i64, Vec<f64>>,
}

impl CentroidModel {
    fn predict(&self, features: &[f64]) -> i64 {
        let query = self.scaling.apply(features);
        let mut best: Option<(i64, f64)> = None;
        for (floor, centroid) in &self.centroids {
            let distance = squared_distance(centroid, &query);
            if best.is_none_or(|(_, best_distance)| distance < best_distance) {
                best = Some((*floor, distance));
            }
        }
        best.map(|(floor, _)| floor).unwrap_or_default()
    }
}

/// A trained floor classifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Model {
    NearestNeighbors(NeighborModel),
    NearestCentroid(CentroidModel),
}

impl Model {
    pub fn kind(&self) -> ModelKind {
        match self {
            Model::NearestNeighbors(_) => ModelKind::NearestNeighbors,
            Model::NearestCentroid(_) => ModelKind::NearestCentroid,
        }
    }

    /// Length of the feature vectors this model was trained on.
    pub fn dimension(&self) -> usize {
        match self {
            Model::NearestNeighbors(model) => model.scaling.min.len(),
            Model::NearestCentroid(model) => model.scaling.min.len(),
        }
    }

    /// Predict the floor for one feature vector.
    ///
    /// Deterministic: the same model and input always give the same floor.
    /// Callers check [`Model::dimension`] first; extra or missing values are
    /// ignored pairwise.
    pub fn predict(&self, features: &[f64]) -> i64 {
        match self {
            Model::NearestNeighbors(model) => model.predict(features),
            Model::NearestCentroid(model) => model.predict(features),
        }
    }
}

/// Fit a classifier on `features[i] -> labels[i]`.
pub fn train(
    config: &ModelConfig,
    features: &[FeatureVector],
    labels: &[i64],
) -> Result<Model, TrainingError> {
    if features.len() != labels.len() {
        return Err(TrainingError::LengthMismatch {
            features: features.len(),
            labels: labels.len(),
        });
    }
    let Some(first) = features.first() else {
        return Err(TrainingError::Empty);
    };

    let dimension = first.len();
    for (index, vector) in features.iter().enumerate() {
        if vector.len() != dimension {
            return Err(TrainingError::RaggedFeatures {
                index,
                expected: dimension,
                found: vector.len(),
            });
        }
        if vector.iter().any(|value| !value.is_finite()) {
            return Err(TrainingError::NonFinite { index });
        }
    }

    let first_floor = labels[0];
    if labels.iter().all(|floor| *floor == first_floor) {
        return Err(TrainingError::SingleFloor { floor: first_floor });
    }

    let scaling = Scaling::fit(features, dimension);
    let scaled: Vec<Vec<f64>> = features.iter().map(|vector| scaling.apply(vector)).collect();

    let model = match config.kind {
        ModelKind::NearestNeighbors => Model::NearestNeighbors(NeighborModel {
            k: config.neighbors.max(1),
            scaling,
            samples: scaled.into_iter().zip(labels.iter().copied()).collect(),
        }),
        ModelKind::NearestCentroid => {
            let mut sums: BTreeMap<i64, (Vec<f64>, usize)> = BTreeMap::new();
            for (vector, floor) in scaled.iter().zip(labels) {
                let entry = sums
                    .entry(*floor)
                    .or_insert_with(|| (vec![0.0; dimension], 0));
                for (sum, value) in entry.0.iter_mut().zip(vector) {
                    *sum += value;
                }
                entry.1 += 1;
            }
            let centroids = sums
                .into_iter()
                .map(|(floor, (sum, count))| {
                    let mean = sum.into_iter().map(|total| total / count as f64).collect();
                    (floor, mean)
                })
                .collect();
            Model::NearestCentroid(CentroidModel { scaling, centroids })
        }
    };

    Ok(model)
}
