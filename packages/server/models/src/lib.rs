#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the ba-urban server.
//!
//! These types are serialized to JSON for the REST API. They are separate
//! from the database row types to allow independent evolution of the API
//! contract.

use ba_urban_database_models::{DataPointRow, IncidentFilter, IncidentRow, MetricRow};
use ba_urban_metric_models::{MetricKind, MetricValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiHealth {
    /// Whether the server is healthy.
    pub healthy: bool,
    /// Server version.
    pub version: String,
}

/// A metric definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMetric {
    /// Metric id.
    pub id: i32,
    /// Metric name (e.g., `"PM2.5"`).
    pub name: String,
    /// Unit label.
    pub unit: Option<String>,
    /// Owning dataset source.
    pub dataset_source_id: i32,
    /// When the metric was first recorded.
    pub created_at: DateTime<Utc>,
}

impl From<MetricRow> for ApiMetric {
    fn from(row: MetricRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            unit: row.unit,
            dataset_source_id: row.dataset_source_id,
            created_at: row.created_at,
        }
    }
}

/// An observation payload: the typed value when the metric is known,
/// otherwise the stored JSON as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiValue {
    /// Payload of a known metric.
    Typed(MetricValue),
    /// Payload of a metric this server does not know.
    Raw(serde_json::Value),
}

impl ApiValue {
    /// Decodes `value` for the metric named `metric_name`, keeping the raw
    /// JSON when the metric is unknown or the payload does not match it.
    #[must_use]
    pub fn from_stored(metric_name: &str, value: serde_json::Value) -> Self {
        MetricKind::from_metric_name(metric_name)
            .and_then(|kind| MetricValue::decode(kind, &value).ok())
            .map_or(Self::Raw(value), Self::Typed)
    }
}

/// One observation with its metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDataPoint {
    /// Data point id.
    pub id: i64,
    /// Metric id.
    pub metric_id: i32,
    /// Observation payload.
    pub value: ApiValue,
    /// When the value was observed.
    pub timestamp: DateTime<Utc>,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
    /// The observed metric.
    pub metric: ApiMetric,
}

impl From<DataPointRow> for ApiDataPoint {
    fn from(row: DataPointRow) -> Self {
        Self {
            id: row.id,
            metric_id: row.metric_id,
            value: ApiValue::from_stored(&row.metric.name, row.value),
            timestamp: row.observed_at,
            created_at: row.created_at,
            metric: row.metric.into(),
        }
    }
}

/// A security incident as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiIncident {
    /// Incident id.
    pub id: i64,
    /// Crime type.
    #[serde(rename = "type")]
    pub incident_type: String,
    /// Subtype and neighborhood.
    pub description: String,
    /// Latitude.
    pub latitude: f64,
    /// Longitude.
    pub longitude: f64,
    /// Comuna label.
    pub zone: Option<String>,
    /// When the incident occurred.
    pub timestamp: DateTime<Utc>,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
}

impl From<IncidentRow> for ApiIncident {
    fn from(row: IncidentRow) -> Self {
        Self {
            id: row.id,
            incident_type: row.incident_type,
            description: row.description,
            latitude: row.latitude,
            longitude: row.longitude,
            zone: row.zone,
            timestamp: row.occurred_at,
            created_at: row.created_at,
        }
    }
}

/// Query parameters for `GET /data`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataQueryParams {
    /// Metric name to filter by.
    pub metric: Option<String>,
}

/// Error for a malformed query parameter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {param}: {value:?}")]
pub struct InvalidParam {
    /// Parameter name.
    pub param: &'static str,
    /// Value received.
    pub value: String,
}

/// Returns `None` for a missing, empty, or `All` value.
fn filter_value(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

fn parse_year(value: Option<&str>) -> Result<Option<i32>, InvalidParam> {
    filter_value(value)
        .map(|v| {
            v.parse::<i32>().map_err(|_| InvalidParam {
                param: "year",
                value: v.to_string(),
            })
        })
        .transpose()
}

/// Query parameters for `GET /incidents/stats` and
/// `GET /incidents/locations`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentFilterParams {
    /// Calendar year, or `All`.
    pub year: Option<String>,
    /// Exact zone label, or `All`.
    pub zone: Option<String>,
}

impl IncidentFilterParams {
    /// Converts the raw parameters into a query filter.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidParam`] if `year` is neither empty, `All`, nor an
    /// integer.
    pub fn to_filter(&self) -> Result<IncidentFilter, InvalidParam> {
        Ok(IncidentFilter {
            year: parse_year(self.year.as_deref())?,
            zone: filter_value(self.zone.as_deref()).map(str::to_string),
        })
    }
}

/// Query parameters for `POST /ingestion/trigger-historical`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerParams {
    /// Single year to ingest; all configured years when absent.
    pub year: Option<String>,
}

impl TriggerParams {
    /// The requested year, if any.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidParam`] if `year` is present but not an integer.
    pub fn year(&self) -> Result<Option<i32>, InvalidParam> {
        parse_year(self.year.as_deref())
    }
}

/// Response of an accepted trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTriggerResponse {
    /// Human-readable confirmation.
    pub message: String,
    /// Id to poll at `/ingestion/jobs/{id}`.
    pub job_id: Uuid,
}

/// Error body, optionally naming the job involved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Error message.
    pub error: String,
    /// Related job, for conflicts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

impl ApiError {
    /// An error without a related job.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            job_id: None,
        }
    }
}
