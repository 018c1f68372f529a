//! Periodic background work: retraining the predictor and pruning history.
//!
//! Both loops follow the same shape: sleep for their interval, run one cycle,
//! log and swallow any failure, repeat. A shutdown signal interrupts the sleep.

mod prune;
mod retrain;

pub use prune::{run_prune_cycle, spawn_prune_loop};
pub use retrain::{RetrainReport, run_retrain_cycle, spawn_retrain_loop};
