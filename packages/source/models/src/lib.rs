#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Data source identities and the canonical normalized incident format.
//!
//! The historical crime feed produces [`RawRow`] records which the row
//! normalizer turns into [`NewIncident`] values ready for a bulk insert.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One CSV record keyed by its (trimmed) header names.
///
/// Empty values are kept as empty strings; consumers treat them as absent.
pub type RawRow = BTreeMap<String, String>;

/// Identity of an external feed as stored in the `dataset_sources` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSourceConfig {
    /// Unique source name (e.g., "Open-Meteo").
    pub name: String,
    /// Human-readable portal or API URL.
    pub url: String,
    /// Refresh frequency label (e.g., "hourly", "annual").
    pub frequency: String,
}

/// A security incident normalized from the historical crime CSV, not yet
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIncident {
    /// Crime type (`"Unknown"` when the source row has none).
    #[serde(rename = "type")]
    pub incident_type: String,
    /// `"{subtype} - {neighborhood}"`, trimmed.
    pub description: String,
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// Zone label such as `"Comuna 7"`. `None` when the row has no comuna.
    pub zone: Option<String>,
    /// When the incident occurred (hour resolution, UTC).
    pub occurred_at: DateTime<Utc>,
}
