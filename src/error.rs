//! Crate-wide error type.

pub use crate::predictor::TrainingError;
pub use crate::store::StoreError;

/// Top-level error for restfloor operations.
///
/// Wraps the subsystem errors the periodic tasks can hit, so a cycle can use
/// `?` across the store, the trainer and the blocking pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
