//! restfloor: a single elevator that learns where to wait.
//!
//! Clients report demands ("the elevator was called to floor N at time T") and
//! ask where the idle elevator should rest, over a one-line protocol on a unix
//! socket. Demands are stored in SQLite; a background loop periodically
//! retrains a floor classifier from the full history and swaps it in, another
//! prunes records older than the retention window.

pub mod config;
pub mod daemon;
pub mod elevator;
pub mod error;
pub mod features;
pub mod orchestrator;
pub mod predictor;
pub mod protocol;
pub mod server;
pub mod store;
pub mod tasks;

pub use config::Config;
pub use elevator::{Cabin, Elevator, Prediction};
pub use error::{Error, Result};
pub use features::{FeatureColumn, FeatureExtractor, FeatureVector};
pub use predictor::{Model, ModelConfig, ModelKind};
pub use protocol::{Request, Response};
pub use store::{Demand, DemandStore, TrainingSet};
