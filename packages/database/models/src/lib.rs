#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Database row types and query parameter definitions.
//!
//! These types represent the shapes of data as stored in and retrieved from
//! the Postgres database. They are distinct from the API response types in
//! `ba_urban_server_models` and the normalized ingestion types in
//! `ba_urban_source_models`.

use chrono::{DateTime, Datelike as _, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A row from the `dataset_sources` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSourceRow {
    /// Primary key.
    pub id: i32,
    /// Unique source name.
    pub name: String,
    /// Portal or API URL.
    pub url: String,
    /// Refresh frequency label.
    pub frequency: String,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

/// A row from the `metrics` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRow {
    /// Primary key.
    pub id: i32,
    /// Metric name, unique per source.
    pub name: String,
    /// Unit label.
    pub unit: Option<String>,
    /// Owning dataset source.
    pub dataset_source_id: i32,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

/// A row from the `urban_data` table joined with its metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPointRow {
    /// Primary key.
    pub id: i64,
    /// Metric the observation belongs to.
    pub metric_id: i32,
    /// Stored JSON payload.
    pub value: serde_json::Value,
    /// When the value was observed.
    pub observed_at: DateTime<Utc>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// The joined metric.
    pub metric: MetricRow,
}

/// A row from the `security_incidents` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRow {
    /// Primary key.
    pub id: i64,
    /// Crime type.
    pub incident_type: String,
    /// Subtype and neighborhood.
    pub description: String,
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// Comuna label.
    pub zone: Option<String>,
    /// When the incident occurred.
    pub occurred_at: DateTime<Utc>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

/// Filters shared by the incident aggregate and location queries.
///
/// Rows without a zone are always excluded by those queries, filtered or
/// not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentFilter {
    /// Calendar year (UTC) of `occurred_at`.
    pub year: Option<i32>,
    /// Exact zone label.
    pub zone: Option<String>,
}

impl IncidentFilter {
    /// Half-open `[Jan 1 year, Jan 1 year+1)` bounds for the year filter.
    ///
    /// Returns `None` when no year is set or the year is out of range.
    #[must_use]
    pub fn year_bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let year = self.year?;
        let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
        let end = NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)?;
        Some((
            start.and_hms_opt(0, 0, 0)?.and_utc(),
            end.and_hms_opt(0, 0, 0)?.and_utc(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_bounds_cover_calendar_year() {
        let filter = IncidentFilter {
            year: Some(2023),
            zone: None,
        };
        let (start, end) = filter.year_bounds().unwrap();
        assert_eq!(start.to_string(), "2023-01-01 00:00:00 UTC");
        assert_eq!(end.to_string(), "2024-01-01 00:00:00 UTC");
    }

    #[test]
    fn no_year_means_no_bounds() {
        assert!(IncidentFilter::default().year_bounds().is_none());
    }
}
