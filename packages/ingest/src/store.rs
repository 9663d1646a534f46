//! Storage port used by the ingestion runner.
//!
//! The runner only ever writes; [`IngestStore`] is the narrow set of writes
//! it needs, implemented for Postgres by [`DatabaseStore`].

use std::sync::Arc;

use async_trait::async_trait;
use ba_urban_database::{DbError, queries};
use ba_urban_metric_models::MetricValue;
use ba_urban_source_models::{DatasetSourceConfig, NewIncident};
use chrono::{DateTime, Utc};
use switchy_database::Database;

/// Writes performed by ingestion runs.
#[async_trait]
pub trait IngestStore: Send + Sync {
    /// Finds or creates the dataset source named `source.name`.
    async fn upsert_dataset_source(&self, source: &DatasetSourceConfig) -> Result<i32, DbError>;

    /// Finds or creates the metric `name` owned by `dataset_source_id`.
    async fn upsert_metric(
        &self,
        name: &str,
        unit: Option<&str>,
        dataset_source_id: i32,
    ) -> Result<i32, DbError>;

    /// Writes one observation and returns its id.
    async fn insert_data_point(
        &self,
        metric_id: i32,
        value: &MetricValue,
        observed_at: DateTime<Utc>,
    ) -> Result<i64, DbError>;

    /// Writes many observations of one metric.
    async fn insert_data_points(
        &self,
        metric_id: i32,
        points: &[(DateTime<Utc>, MetricValue)],
    ) -> Result<u64, DbError>;

    /// Bulk-inserts one batch of incidents.
    async fn insert_incidents(&self, incidents: &[NewIncident]) -> Result<u64, DbError>;
}

/// [`IngestStore`] backed by a `switchy_database` connection.
#[derive(Clone)]
pub struct DatabaseStore {
    db: Arc<dyn Database>,
}

impl DatabaseStore {
    /// Wraps a shared database connection.
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IngestStore for DatabaseStore {
    async fn upsert_dataset_source(&self, source: &DatasetSourceConfig) -> Result<i32, DbError> {
        queries::upsert_dataset_source(self.db.as_ref(), source).await
    }

    async fn upsert_metric(
        &self,
        name: &str,
        unit: Option<&str>,
        dataset_source_id: i32,
    ) -> Result<i32, DbError> {
        queries::upsert_metric(self.db.as_ref(), name, unit, dataset_source_id).await
    }

    async fn insert_data_point(
        &self,
        metric_id: i32,
        value: &MetricValue,
        observed_at: DateTime<Utc>,
    ) -> Result<i64, DbError> {
        queries::insert_data_point(self.db.as_ref(), metric_id, value, observed_at).await
    }

    async fn insert_data_points(
        &self,
        metric_id: i32,
        points: &[(DateTime<Utc>, MetricValue)],
    ) -> Result<u64, DbError> {
        queries::insert_data_points(self.db.as_ref(), metric_id, points).await
    }

    async fn insert_incidents(&self, incidents: &[NewIncident]) -> Result<u64, DbError> {
        queries::insert_incidents(self.db.as_ref(), incidents).await
    }
}
