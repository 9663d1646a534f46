#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Metric kinds and their typed observation payloads.
//!
//! Every `UrbanDataPoint` row stores an opaque JSON object whose shape
//! depends on the metric it belongs to (`{"temp": ..}`, `{"pm25": ..}`,
//! ...). [`MetricValue`] is the typed view of that payload and
//! [`MetricKind`] is the key that selects which shape applies.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// The measurable quantities tracked by the dashboard.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricKind {
    /// Air temperature two metres above ground
    Temperature,
    /// Fine particulate matter concentration
    Pm25,
    /// Monthly crime counts per zone and type
    CrimeCount,
    /// Road traffic density index
    TrafficDensity,
    /// Subway service status
    SubwayStatus,
}

impl MetricKind {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Temperature,
            Self::Pm25,
            Self::CrimeCount,
            Self::TrafficDensity,
            Self::SubwayStatus,
        ]
    }

    /// The metric name as stored in the `metrics` table.
    #[must_use]
    pub const fn metric_name(self) -> &'static str {
        match self {
            Self::Temperature => "Temperature 2m",
            Self::Pm25 => "PM2.5",
            Self::CrimeCount => "Crime Count",
            Self::TrafficDensity => "Traffic Density",
            Self::SubwayStatus => "Subway Status",
        }
    }

    /// The unit label stored alongside the metric.
    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Pm25 => "μg/m³",
            Self::CrimeCount => "Incidents",
            Self::TrafficDensity => "Index 0-100",
            Self::SubwayStatus => "Status",
        }
    }

    /// Resolves a stored metric name back to its kind.
    #[must_use]
    pub fn from_metric_name(name: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.metric_name() == name)
    }
}

/// Typed payload of a single observation.
///
/// Serialized untagged so the stored JSON is the bare object the dashboard
/// reads (`value.temp`, `value.pm25`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// `{"temp": 21.4}`
    Temperature {
        /// Degrees Celsius.
        temp: f64,
    },
    /// `{"pm25": 12.1}`
    Pm25 {
        /// Micrograms per cubic metre.
        pm25: f64,
    },
    /// `{"zone": "Palermo", "type": "Hurto", "count": 97}`
    CrimeCount {
        /// Zone or neighborhood label.
        zone: String,
        /// Crime type label.
        #[serde(rename = "type")]
        crime_type: String,
        /// Number of incidents.
        count: u32,
    },
    /// `{"density": 63}`
    TrafficDensity {
        /// Density index (0-100).
        density: u32,
    },
    /// `{"status": "Normal"}`
    SubwayStatus {
        /// Service status label.
        status: String,
    },
}

/// Error returned when a stored payload does not match its metric.
#[derive(Debug, thiserror::Error)]
pub enum MetricValueError {
    /// The JSON matches none of the known payload shapes.
    #[error("Unrecognized metric payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON is a valid payload, but for another metric kind.
    #[error("Payload for {found} stored under {expected}")]
    KindMismatch {
        /// Kind the payload was read as.
        expected: MetricKind,
        /// Kind the payload actually has.
        found: MetricKind,
    },
}

impl MetricValue {
    /// Returns the metric kind this payload belongs to.
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        match self {
            Self::Temperature { .. } => MetricKind::Temperature,
            Self::Pm25 { .. } => MetricKind::Pm25,
            Self::CrimeCount { .. } => MetricKind::CrimeCount,
            Self::TrafficDensity { .. } => MetricKind::TrafficDensity,
            Self::SubwayStatus { .. } => MetricKind::SubwayStatus,
        }
    }

    /// Builds the payload for a single numeric sample of `kind`.
    ///
    /// Returns `None` for kinds whose payload is not a single number.
    #[must_use]
    pub const fn from_sample(kind: MetricKind, sample: f64) -> Option<Self> {
        match kind {
            MetricKind::Temperature => Some(Self::Temperature { temp: sample }),
            MetricKind::Pm25 => Some(Self::Pm25 { pm25: sample }),
            MetricKind::CrimeCount | MetricKind::TrafficDensity | MetricKind::SubwayStatus => {
                None
            }
        }
    }

    /// Reads a stored JSON payload as the variant for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`MetricValueError`] if the JSON has none of the known
    /// shapes or has the shape of a different kind.
    pub fn decode(kind: MetricKind, value: &serde_json::Value) -> Result<Self, MetricValueError> {
        let decoded: Self = serde_json::from_value(value.clone())?;
        let found = decoded.kind();
        if found != kind {
            return Err(MetricValueError::KindMismatch {
                expected: kind,
                found,
            });
        }
        Ok(decoded)
    }
}
