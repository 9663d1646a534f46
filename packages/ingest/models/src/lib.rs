#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ingestion job and run summary types.

use ba_urban_metric_models::MetricKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use uuid::Uuid;

/// Result of ingesting one year of the historical CSV.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearSummary {
    /// Year ingested.
    pub year: i32,
    /// Records read from the CSV.
    pub rows_read: u64,
    /// Records that normalized into incidents.
    pub accepted: u64,
    /// Records dropped by the normalizer.
    pub rejected: u64,
    /// Rows reported written by the store.
    pub inserted: u64,
    /// Bulk insert calls issued.
    pub batches: u64,
}

/// A year whose ingestion stopped with an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearFailure {
    /// Year that failed.
    pub year: i32,
    /// Error message.
    pub error: String,
}

/// Result of one successful metric ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSummary {
    /// Metric recorded.
    pub metric: MetricKind,
    /// Dataset source name.
    pub source: String,
    /// Timestamp of the selected sample.
    pub observed_at: DateTime<Utc>,
    /// Id of the written data point.
    pub data_point_id: i64,
}

/// Which years a historical job covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "year", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobScope {
    /// Every configured year, oldest first.
    AllYears,
    /// A single year.
    Year(i32),
}

/// Lifecycle of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Still running.
    Running,
    /// Finished with at least one year ingested (or nothing to ingest).
    Completed,
    /// Finished with every year in scope failing.
    Failed,
}

/// A historical ingestion job as tracked by the job registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Job identifier returned to the caller that triggered it.
    pub id: Uuid,
    /// Years covered.
    pub scope: JobScope,
    /// Current status.
    pub status: JobStatus,
    /// When the job was accepted.
    pub started_at: DateTime<Utc>,
    /// When the job finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Completed years.
    pub years: Vec<YearSummary>,
    /// Years that stopped with an error.
    pub failed_years: Vec<YearFailure>,
    /// Job-level error, set when the job ends without finishing normally.
    pub error: Option<String>,
}

impl JobRecord {
    /// Creates a running job record.
    #[must_use]
    pub fn new(id: Uuid, scope: JobScope, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            scope,
            status: JobStatus::Running,
            started_at,
            finished_at: None,
            years: Vec::new(),
            failed_years: Vec::new(),
            error: None,
        }
    }

    /// Total incidents written across completed years.
    #[must_use]
    pub fn total_inserted(&self) -> u64 {
        self.years.iter().map(|y| y.inserted).sum()
    }
}
