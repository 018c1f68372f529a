//! Timestamp feature extraction.
//!
//! A [`FeatureExtractor`] turns a demand timestamp into the numeric vector the
//! predictor trains and predicts on. Which columns are extracted, and in what
//! order, comes from configuration; the same extractor must be used for
//! training and for prediction so vectors line up.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Numeric encoding of a timestamp, one value per configured column.
pub type FeatureVector = Vec<f64>;

/// A single timestamp-derived column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureColumn {
    /// Hour of day, 0-23.
    Hour,
    /// Minute of hour, 0-59.
    Minute,
    /// Day of week, Monday = 0 through Sunday = 6.
    #[serde(alias = "week day", alias = "weekday")]
    WeekDay,
    /// Day of month, 1-31.
    Day,
    /// Month of year, 1-12.
    Month,
    Year,
    /// Ordinal day of year, 1-366.
    DayOfYear,
    /// 1 on Saturday and Sunday, 0 otherwise.
    Weekend,
}

impl FeatureColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureColumn::Hour => "hour",
            FeatureColumn::Minute => "minute",
            FeatureColumn::WeekDay => "week_day",
            FeatureColumn::Day => "day",
            FeatureColumn::Month => "month",
            FeatureColumn::Year => "year",
            FeatureColumn::DayOfYear => "day_of_year",
            FeatureColumn::Weekend => "weekend",
        }
    }

    /// Compute this column's value for a timestamp.
    pub fn value(&self, timestamp: &DateTime<Utc>) -> f64 {
        let value = match self {
            FeatureColumn::Hour => timestamp.hour() as i64,
            FeatureColumn::Minute => timestamp.minute() as i64,
            FeatureColumn::WeekDay => timestamp.weekday().num_days_from_monday() as i64,
            FeatureColumn::Day => timestamp.day() as i64,
            FeatureColumn::Month => timestamp.month() as i64,
            FeatureColumn::Year => timestamp.year() as i64,
            FeatureColumn::DayOfYear => timestamp.ordinal() as i64,
            FeatureColumn::Weekend => {
                matches!(timestamp.weekday(), Weekday::Sat | Weekday::Sun) as i64
            }
        };
        value as f64
    }
}

impl std::fmt::Display for FeatureColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered set of columns applied to every timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureExtractor {
    columns: Vec<FeatureColumn>,
}

impl FeatureExtractor {
    pub fn new(columns: Vec<FeatureColumn>) -> Self {
        Self { columns }
    }

    pub fn extract(&self, timestamp: &DateTime<Utc>) -> FeatureVector {
        self.columns
            .iter()
            .map(|column| column.value(timestamp))
            .collect()
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(vec![FeatureColumn::Hour, FeatureColumn::WeekDay])
    }
}
