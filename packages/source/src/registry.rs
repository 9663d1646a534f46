//! Feed registry, loading all feed definitions from embedded TOML configs.
//!
//! Each `.toml` file in `packages/source/feeds/` is baked into the binary
//! at compile time via [`include_str!`].

use crate::feed_def::{
    HistoricalFeedDefinition, MetricFeedDefinition, parse_historical_toml, parse_metric_toml,
};

const HISTORICAL_TOML: (&str, &str) = ("ba_delitos", include_str!("../feeds/ba_delitos.toml"));

/// Metric feeds, in the order a cycle runs them.
const METRIC_TOMLS: &[(&str, &str)] = &[
    (
        "open_meteo_weather",
        include_str!("../feeds/open_meteo_weather.toml"),
    ),
    (
        "open_meteo_air_quality",
        include_str!("../feeds/open_meteo_air_quality.toml"),
    ),
];

/// Returns the historical crime feed definition.
///
/// # Panics
///
/// Panics if the embedded TOML config is malformed.
#[must_use]
pub fn historical_feed() -> HistoricalFeedDefinition {
    let (name, toml) = HISTORICAL_TOML;
    parse_historical_toml(toml).unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"))
}

/// Returns all metric feed definitions.
///
/// # Panics
///
/// Panics if any embedded TOML config is malformed.
#[must_use]
pub fn metric_feeds() -> Vec<MetricFeedDefinition> {
    METRIC_TOMLS
        .iter()
        .map(|(name, toml)| {
            parse_metric_toml(toml).unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"))
        })
        .collect()
}
