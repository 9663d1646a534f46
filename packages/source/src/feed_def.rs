//! Config-driven feed definitions.
//!
//! Each feed is described by a small TOML file under `feeds/`. The
//! historical feed is a yearly CSV addressed by a URL template; a metric
//! feed is one Open-Meteo endpoint plus the hourly series to sample.

use std::ops::RangeInclusive;

use ba_urban_metric_models::MetricKind;
use ba_urban_source_models::DatasetSourceConfig;
use serde::Deserialize;

use crate::SourceError;

const fn default_batch_size() -> usize {
    1000
}

/// The yearly historical crime CSV.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoricalFeedDefinition {
    /// Unique identifier (e.g., `"ba_delitos"`).
    pub id: String,
    /// Dataset source identity of the publisher.
    pub source: DatasetSourceConfig,
    /// Download URL with a `{year}` placeholder.
    pub url_template: String,
    /// First year published.
    pub first_year: i32,
    /// Last year published (inclusive).
    pub last_year: i32,
    /// Number of accepted rows per bulk insert.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl HistoricalFeedDefinition {
    /// Configured years, oldest first.
    #[must_use]
    pub const fn years(&self) -> RangeInclusive<i32> {
        self.first_year..=self.last_year
    }

    /// Download URL for `year`.
    #[must_use]
    pub fn url_for_year(&self, year: i32) -> String {
        self.url_template.replace("{year}", &year.to_string())
    }
}

/// One hourly series from an Open-Meteo endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricFeedDefinition {
    /// Unique identifier (e.g., `"open_meteo_weather"`).
    pub id: String,
    /// Dataset source the metric belongs to.
    pub source: DatasetSourceConfig,
    /// Full request URL, query string included.
    pub api_url: String,
    /// Field under `hourly` holding the samples (e.g., `"pm2_5"`).
    pub series: String,
    /// Metric the samples are recorded as.
    pub metric: MetricKind,
}

/// Parses a historical feed definition from TOML.
///
/// # Errors
///
/// Returns [`SourceError::Config`] if the TOML is malformed or missing
/// required fields.
pub fn parse_historical_toml(toml_str: &str) -> Result<HistoricalFeedDefinition, SourceError> {
    Ok(toml::from_str(toml_str)?)
}

/// Parses a metric feed definition from TOML.
///
/// # Errors
///
/// Returns [`SourceError::Config`] if the TOML is malformed, missing
/// required fields, or names an unknown metric.
pub fn parse_metric_toml(toml_str: &str) -> Result<MetricFeedDefinition, SourceError> {
    Ok(toml::from_str(toml_str)?)
}
