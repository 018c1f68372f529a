//! Service configuration.

use crate::features::{FeatureColumn, FeatureExtractor};
use crate::predictor::ModelConfig;

use serde::{Deserialize, Serialize};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the default instance directory.
pub const INSTANCE_DIR_ENV: &str = "RESTFLOOR_DIR";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration, loaded from `config.toml`.
///
/// Every field is optional in the file; missing fields fall back to
/// [`Config::default`]. Only the periodic tasks' timing and the feature
/// vector shape depend on these values, never the wire protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    /// Directory holding the socket, database, PID file and logs.
    pub instance_dir: PathBuf,
    /// Floor the elevator reports before any demand arrives.
    pub initial_floor: i64,
    /// Seconds between retraining passes.
    pub retrain_interval_secs: u64,
    /// Run one retraining pass immediately at startup.
    pub retrain_on_start: bool,
    /// Seconds between pruning passes.
    pub prune_interval_secs: u64,
    /// Maximum age of a demand record before it is pruned.
    pub retention_secs: u64,
    /// Upper bound for reading a request line and for writing its response.
    pub request_timeout_secs: u64,
    /// Timestamp columns fed to the predictor, in order.
    pub feature_columns: Vec<FeatureColumn>,
    pub model: ModelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_dir: Self::default_instance_dir(),
            initial_floor: 0,
            retrain_interval_secs: 3600,
            retrain_on_start: true,
            prune_interval_secs: 86_400,
            retention_secs: 90 * 86_400,
            request_timeout_secs: 10,
            feature_columns: vec![FeatureColumn::Hour, FeatureColumn::WeekDay],
            model: ModelConfig::default(),
        }
    }
}

impl Config {
    /// `$RESTFLOOR_DIR`, else `$HOME/.restfloor`, else `./.restfloor`.
    pub fn default_instance_dir() -> PathBuf {
        if let Some(dir) = std::env::var_os(INSTANCE_DIR_ENV) {
            return PathBuf::from(dir);
        }
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".restfloor")
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `<instance_dir>/config.toml`
    /// is used when present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let candidate = Self::default_instance_dir().join("config.toml");
                if candidate.is_file() {
                    Self::from_file(&candidate)?
                } else {
                    Self::default()
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("retrain_interval_secs", self.retrain_interval_secs),
            ("prune_interval_secs", self.prune_interval_secs),
            ("retention_secs", self.retention_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }

        let representable = i64::try_from(self.retention_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .and_then(|window| chrono::DateTime::<chrono::Utc>::UNIX_EPOCH.checked_sub_signed(window))
            .is_some();
        if !representable {
            return Err(ConfigError::Invalid(format!(
                "retention_secs {} is too large",
                self.retention_secs
            )));
        }

        if self.feature_columns.is_empty() {
            return Err(ConfigError::Invalid(
                "feature_columns must name at least one column".into(),
            ));
        }
        let mut seen = HashSet::new();
        for column in &self.feature_columns {
            if !seen.insert(column) {
                return Err(ConfigError::Invalid(format!(
                    "feature column '{column}' is listed more than once"
                )));
            }
        }

        if self.model.neighbors == 0 {
            return Err(ConfigError::Invalid("model.neighbors must be at least 1".into()));
        }

        Ok(())
    }

    pub fn socket_path(&self) -> PathBuf {
        self.instance_dir.join("restfloor.sock")
    }

    pub fn database_path(&self) -> PathBuf {
        self.instance_dir.join("demands.db")
    }

    pub fn feature_extractor(&self) -> FeatureExtractor {
        FeatureExtractor::new(self.feature_columns.clone())
    }

    pub fn retrain_interval(&self) -> Duration {
        Duration::from_secs(self.retrain_interval_secs)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::ModelKind;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config = Config::from_toml(
            r#"
            retrain_interval_secs = 120
            feature_columns = ["hour", "week day", "month"]

            [model]
            kind = "nearest_centroid"
            "#,
        )
        .unwrap();

        assert_eq!(config.retrain_interval_secs, 120);
        assert_eq!(config.prune_interval_secs, 86_400);
        assert_eq!(
            config.feature_columns,
            vec![FeatureColumn::Hour, FeatureColumn::WeekDay, FeatureColumn::Month]
        );
        assert_eq!(config.model.kind, ModelKind::NearestCentroid);
        assert_eq!(config.model.neighbors, ModelConfig::default().neighbors);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = Config {
            prune_interval_secs: 0,
            ..Config::default()
        };
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("prune_interval_secs"));
    }

    #[test]
    fn oversized_retention_is_rejected() {
        let config = Config {
            retention_secs: 9_000_000_000_000,
            ..Config::default()
        };
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("retention_secs"));

        let century = Config {
            retention_secs: 100 * 365 * 86_400,
            ..Config::default()
        };
        assert!(century.validate().is_ok());
    }

    #[test]
    fn duplicate_and_empty_columns_are_rejected() {
        let duplicated = Config {
            feature_columns: vec![FeatureColumn::Hour, FeatureColumn::Hour],
            ..Config::default()
        };
        assert!(matches!(duplicated.validate(), Err(ConfigError::Invalid(_))));

        let empty = Config {
            feature_columns: Vec::new(),
            ..Config::default()
        };
        assert!(matches!(empty.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_column_fails_to_parse() {
        assert!(Config::from_toml(r#"feature_columns = ["fortnight"]"#).is_err());
    }

    #[test]
    fn explicit_missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let error = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(error, ConfigError::Read { .. }));
    }

    #[test]
    fn runtime_paths_live_under_instance_dir() {
        let config = Config {
            instance_dir: PathBuf::from("/tmp/restfloor-test"),
            ..Config::default()
        };
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/restfloor-test/restfloor.sock"));
        assert_eq!(config.database_path(), PathBuf::from("/tmp/restfloor-test/demands.db"));
    }
}
