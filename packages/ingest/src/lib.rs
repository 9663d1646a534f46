#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ingestion runner for the historical crime CSV and the hourly metrics.
//!
//! Historical years are streamed row by row through the normalizer and
//! written in fixed-size batches. Metric feeds are fetched whole and only
//! the sample nearest to "now" is recorded.

pub mod jobs;
pub mod maintenance;
pub mod scheduler;
pub mod store;

use std::time::Instant;

use ba_urban_database::DbError;
use ba_urban_ingest_models::{MetricSummary, YearSummary};
use ba_urban_metric_models::MetricValue;
use ba_urban_source::feed_def::MetricFeedDefinition;
use ba_urban_source::normalize::normalize_row;
use ba_urban_source::{HistoricalFeed, MetricFeed, SourceError};
use chrono::{DateTime, Utc};
use futures::StreamExt as _;

use crate::store::IngestStore;

/// Accepted rows per bulk insert.
pub const BATCH_SIZE: usize = 1000;

/// Errors that stop a single year or metric run.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The remote resource could not be retrieved.
    #[error("Fetch failed: {0}")]
    Fetch(#[source] SourceError),

    /// The stream or payload could not be decoded.
    #[error("Parse failed: {0}")]
    Parse(#[source] SourceError),

    /// A write was rejected by the store.
    #[error("Storage failed: {0}")]
    Storage(#[from] DbError),
}

impl From<SourceError> for IngestError {
    fn from(e: SourceError) -> Self {
        if e.is_fetch_failure() {
            Self::Fetch(e)
        } else {
            Self::Parse(e)
        }
    }
}

/// Ingests one year of the historical feed.
///
/// Accepted rows are buffered and written through `store` every
/// `batch_size` rows, with the remainder flushed once the stream ends. A
/// year with no accepted rows performs no write at all.
///
/// # Errors
///
/// Returns [`IngestError`] if the download cannot be opened, the stream
/// breaks mid-year, or a batch insert fails. Batches flushed before the
/// failure stay written.
pub async fn ingest_year(
    feed: &dyn HistoricalFeed,
    store: &dyn IngestStore,
    year: i32,
    batch_size: usize,
) -> Result<YearSummary, IngestError> {
    let start = Instant::now();
    let batch_size = batch_size.max(1);
    let mut summary = YearSummary {
        year,
        ..YearSummary::default()
    };

    let mut rows = feed.open_year(year).await?;
    let mut batch = Vec::with_capacity(batch_size);

    while let Some(row) = rows.next().await {
        let row = row?;
        summary.rows_read += 1;

        match normalize_row(&row) {
            Ok(incident) => {
                summary.accepted += 1;
                batch.push(incident);
            }
            Err(_) => summary.rejected += 1,
        }

        if batch.len() >= batch_size {
            summary.inserted += store.insert_incidents(&batch).await?;
            summary.batches += 1;
            log::debug!(
                "[{}] {year}: batch {} written ({} accepted so far)",
                feed.id(),
                summary.batches,
                summary.accepted
            );
            batch.clear();
        }
    }

    if !batch.is_empty() {
        summary.inserted += store.insert_incidents(&batch).await?;
        summary.batches += 1;
    }

    log::info!(
        "[{}] {year}: inserted {} ({} accepted, {} rejected of {} rows) in {:.1}s",
        feed.id(),
        summary.inserted,
        summary.accepted,
        summary.rejected,
        summary.rows_read,
        start.elapsed().as_secs_f64()
    );

    Ok(summary)
}

/// Ingests each of `years` in order, one at a time.
///
/// A failed year is logged and does not stop the following years.
pub async fn ingest_all_years(
    feed: &dyn HistoricalFeed,
    store: &dyn IngestStore,
    years: impl IntoIterator<Item = i32>,
    batch_size: usize,
) -> Vec<(i32, Result<YearSummary, IngestError>)> {
    let mut results = Vec::new();

    for year in years {
        let result = ingest_year(feed, store, year, batch_size).await;
        if let Err(e) = &result {
            log::error!("[{}] {year}: ingestion failed: {e}", feed.id());
        }
        results.push((year, result));
    }

    results
}

/// Records the sample of `definition` nearest to `now` as one data point.
///
/// The dataset source and metric are found or created before the data
/// point is written.
///
/// # Errors
///
/// Returns [`IngestError`] if the fetch fails, the payload has no usable
/// sample, or a write fails.
pub async fn ingest_metric(
    feed: &dyn MetricFeed,
    store: &dyn IngestStore,
    definition: &MetricFeedDefinition,
    now: DateTime<Utc>,
) -> Result<MetricSummary, IngestError> {
    let series = feed.fetch_series(definition).await?;
    let (observed_at, sample) = series.nearest_sample(now)?;

    let kind = definition.metric;
    let value = MetricValue::from_sample(kind, sample).ok_or_else(|| {
        IngestError::Parse(SourceError::Payload {
            message: format!("{kind} is not recorded from a numeric series"),
        })
    })?;

    let source_id = store.upsert_dataset_source(&definition.source).await?;
    let metric_id = store
        .upsert_metric(kind.metric_name(), Some(kind.unit()), source_id)
        .await?;
    let data_point_id = store
        .insert_data_point(metric_id, &value, observed_at)
        .await?;

    log::info!(
        "[{}] recorded {} = {sample} at {observed_at}",
        definition.id,
        kind.metric_name()
    );

    Ok(MetricSummary {
        metric: kind,
        source: definition.source.name.clone(),
        observed_at,
        data_point_id,
    })
}

/// Runs every metric feed once, in order.
///
/// Each feed is isolated: a failure is logged and the next feed still
/// runs.
pub async fn run_metric_cycle(
    feed: &dyn MetricFeed,
    store: &dyn IngestStore,
    definitions: &[MetricFeedDefinition],
    now: DateTime<Utc>,
) -> Vec<(String, Result<MetricSummary, IngestError>)> {
    let mut results = Vec::with_capacity(definitions.len());

    for definition in definitions {
        let result = ingest_metric(feed, store, definition, now).await;
        if let Err(e) = &result {
            log::error!("[{}] metric ingestion failed: {e}", definition.id);
        }
        results.push((definition.id.clone(), result));
    }

    results
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory feeds and store shared by the crate's tests.

    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use ba_urban_database::DbError;
    use ba_urban_metric_models::MetricValue;
    use ba_urban_source::feed_def::MetricFeedDefinition;
    use ba_urban_source::open_meteo::HourlySeries;
    use ba_urban_source::{HistoricalFeed, MetricFeed, RowStream, SourceError};
    use ba_urban_source_models::{DatasetSourceConfig, NewIncident, RawRow};
    use chrono::{DateTime, Utc};
    use futures::StreamExt as _;

    /// Store call, in the order it happened.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        UpsertSource(String),
        UpsertMetric(String, i32),
        InsertDataPoint(i32, MetricValue),
        InsertDataPoints(i32, usize),
        InsertIncidents(usize),
    }

    #[derive(Default)]
    pub struct FakeStore {
        pub calls: Mutex<Vec<Call>>,
        pub fail_incident_inserts: bool,
    }

    impl FakeStore {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    fn storage_error() -> DbError {
        DbError::Conversion {
            message: "store unavailable".to_string(),
        }
    }

    #[async_trait]
    impl crate::store::IngestStore for FakeStore {
        async fn upsert_dataset_source(
            &self,
            source: &DatasetSourceConfig,
        ) -> Result<i32, DbError> {
            self.record(Call::UpsertSource(source.name.clone()));
            Ok(1)
        }

        async fn upsert_metric(
            &self,
            name: &str,
            _unit: Option<&str>,
            dataset_source_id: i32,
        ) -> Result<i32, DbError> {
            self.record(Call::UpsertMetric(name.to_string(), dataset_source_id));
            Ok(10)
        }

        async fn insert_data_point(
            &self,
            metric_id: i32,
            value: &MetricValue,
            _observed_at: DateTime<Utc>,
        ) -> Result<i64, DbError> {
            self.record(Call::InsertDataPoint(metric_id, value.clone()));
            Ok(100)
        }

        async fn insert_data_points(
            &self,
            metric_id: i32,
            points: &[(DateTime<Utc>, MetricValue)],
        ) -> Result<u64, DbError> {
            self.record(Call::InsertDataPoints(metric_id, points.len()));
            Ok(points.len() as u64)
        }

        async fn insert_incidents(&self, incidents: &[NewIncident]) -> Result<u64, DbError> {
            if self.fail_incident_inserts {
                return Err(storage_error());
            }
            self.record(Call::InsertIncidents(incidents.len()));
            Ok(incidents.len() as u64)
        }
    }

    pub fn valid_row(i: usize) -> RawRow {
        [
            ("latitud", "-34.6"),
            ("longitud", "-58.4"),
            ("fecha", "2023-03-15"),
            ("franja", "10"),
            ("comuna", "1"),
            ("tipo", "Hurto"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .chain(std::iter::once(("barrio".to_string(), format!("Barrio {i}"))))
        .collect()
    }

    pub fn rejected_row() -> RawRow {
        [("latitud", "0"), ("longitud", "-58.4"), ("fecha", "2023-03-15")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// What a fake year yields.
    #[derive(Clone)]
    pub enum YearData {
        Rows(Vec<RawRow>),
        /// Rows followed by a mid-stream parse error.
        Broken(Vec<RawRow>),
        /// The download itself fails.
        Unavailable,
    }

    #[derive(Default)]
    pub struct FakeHistoricalFeed {
        pub years: BTreeMap<i32, YearData>,
    }

    #[async_trait]
    impl HistoricalFeed for FakeHistoricalFeed {
        fn id(&self) -> &str {
            "fake"
        }

        async fn open_year(&self, year: i32) -> Result<RowStream, SourceError> {
            match self.years.get(&year) {
                Some(YearData::Rows(rows)) => {
                    let items: Vec<Result<RawRow, SourceError>> =
                        rows.iter().cloned().map(Ok).collect();
                    Ok(futures::stream::iter(items).boxed())
                }
                Some(YearData::Broken(rows)) => {
                    let mut items: Vec<Result<RawRow, SourceError>> =
                        rows.iter().cloned().map(Ok).collect();
                    items.push(Err(SourceError::Payload {
                        message: "truncated record".to_string(),
                    }));
                    Ok(futures::stream::iter(items).boxed())
                }
                Some(YearData::Unavailable) | None => Err(SourceError::HttpStatus {
                    url: format!("https://example.com/delitos_{year}.csv"),
                    status: 404,
                }),
            }
        }
    }

    /// Serves canned series keyed by feed id; unknown ids fail with 503.
    #[derive(Default)]
    pub struct FakeMetricFeed {
        pub series: BTreeMap<String, HourlySeries>,
        pub fetches: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MetricFeed for FakeMetricFeed {
        async fn fetch_series(
            &self,
            definition: &MetricFeedDefinition,
        ) -> Result<HourlySeries, SourceError> {
            self.fetches.lock().unwrap().push(definition.id.clone());
            self.series
                .get(&definition.id)
                .cloned()
                .ok_or_else(|| SourceError::HttpStatus {
                    url: definition.api_url.clone(),
                    status: 503,
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use ba_urban_metric_models::MetricKind;
    use ba_urban_source::open_meteo::HourlySeries;
    use ba_urban_source::registry::metric_feeds;
    use chrono::TimeZone as _;

    use super::testing::{
        Call, FakeHistoricalFeed, FakeMetricFeed, FakeStore, YearData, rejected_row, valid_row,
    };
    use super::*;

    fn feed_with(year: i32, data: YearData) -> FakeHistoricalFeed {
        FakeHistoricalFeed {
            years: BTreeMap::from([(year, data)]),
        }
    }

    #[tokio::test]
    async fn flushes_full_batches_then_remainder() {
        let rows = (0..2500).map(valid_row).collect();
        let feed = feed_with(2023, YearData::Rows(rows));
        let store = FakeStore::default();

        let summary = ingest_year(&feed, &store, 2023, BATCH_SIZE).await.unwrap();

        assert_eq!(
            store.calls(),
            vec![
                Call::InsertIncidents(1000),
                Call::InsertIncidents(1000),
                Call::InsertIncidents(500),
            ]
        );
        assert_eq!(summary.inserted, 2500);
        assert_eq!(summary.batches, 3);
    }

    #[tokio::test]
    async fn empty_year_makes_no_insert() {
        let feed = feed_with(2018, YearData::Rows(vec![]));
        let store = FakeStore::default();

        let summary = ingest_year(&feed, &store, 2018, BATCH_SIZE).await.unwrap();

        assert!(store.calls().is_empty());
        assert_eq!(summary.rows_read, 0);
        assert_eq!(summary.batches, 0);
    }

    #[tokio::test]
    async fn counts_rejected_rows_without_writing_them() {
        let rows = vec![valid_row(0), rejected_row(), valid_row(1), rejected_row()];
        let feed = feed_with(2021, YearData::Rows(rows));
        let store = FakeStore::default();

        let summary = ingest_year(&feed, &store, 2021, BATCH_SIZE).await.unwrap();

        assert_eq!(summary.rows_read, 4);
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected, 2);
        assert_eq!(store.calls(), vec![Call::InsertIncidents(2)]);
    }

    #[tokio::test]
    async fn only_rejected_rows_make_no_insert() {
        let feed = feed_with(2021, YearData::Rows(vec![rejected_row(); 3]));
        let store = FakeStore::default();

        let summary = ingest_year(&feed, &store, 2021, BATCH_SIZE).await.unwrap();

        assert!(store.calls().is_empty());
        assert_eq!(summary.rejected, 3);
    }

    #[tokio::test]
    async fn stream_error_keeps_flushed_batches_only() {
        let rows = (0..5).map(valid_row).collect();
        let feed = feed_with(2022, YearData::Broken(rows));
        let store = FakeStore::default();

        let err = ingest_year(&feed, &store, 2022, 2).await.unwrap_err();

        assert!(matches!(err, IngestError::Parse(_)));
        assert_eq!(
            store.calls(),
            vec![Call::InsertIncidents(2), Call::InsertIncidents(2)]
        );
    }

    #[tokio::test]
    async fn unavailable_year_is_a_fetch_error() {
        let feed = FakeHistoricalFeed::default();
        let store = FakeStore::default();

        let err = ingest_year(&feed, &store, 2020, BATCH_SIZE).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch(_)));
    }

    #[tokio::test]
    async fn storage_failure_stops_the_year() {
        let feed = feed_with(2023, YearData::Rows(vec![valid_row(0)]));
        let store = FakeStore {
            fail_incident_inserts: true,
            ..FakeStore::default()
        };

        let err = ingest_year(&feed, &store, 2023, BATCH_SIZE).await.unwrap_err();
        assert!(matches!(err, IngestError::Storage(_)));
    }

    #[tokio::test]
    async fn failed_year_does_not_stop_later_years() {
        let feed = FakeHistoricalFeed {
            years: BTreeMap::from([
                (2019, YearData::Rows(vec![valid_row(0), valid_row(1)])),
                (2020, YearData::Unavailable),
                (2021, YearData::Rows(vec![valid_row(2)])),
            ]),
        };
        let store = FakeStore::default();

        let results = ingest_all_years(&feed, &store, 2019..=2021, BATCH_SIZE).await;

        let years: Vec<i32> = results.iter().map(|(y, _)| *y).collect();
        assert_eq!(years, vec![2019, 2020, 2021]);
        assert_eq!(results[0].1.as_ref().unwrap().inserted, 2);
        assert!(results[1].1.is_err());
        assert_eq!(results[2].1.as_ref().unwrap().inserted, 1);
    }

    fn series_around(now: DateTime<Utc>, values: [f64; 3]) -> HourlySeries {
        HourlySeries {
            times: vec![
                now - chrono::TimeDelta::minutes(10),
                now - chrono::TimeDelta::minutes(1),
                now + chrono::TimeDelta::minutes(5),
            ],
            values: values.into_iter().map(Some).collect(),
        }
    }

    #[tokio::test]
    async fn metric_records_nearest_sample_after_upserts() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let defs = metric_feeds();
        let weather = &defs[0];
        let feed = FakeMetricFeed {
            series: BTreeMap::from([(weather.id.clone(), series_around(now, [18.0, 19.5, 21.0]))]),
            ..FakeMetricFeed::default()
        };
        let store = FakeStore::default();

        let summary = ingest_metric(&feed, &store, weather, now).await.unwrap();

        assert_eq!(summary.metric, MetricKind::Temperature);
        assert_eq!(summary.observed_at, now - chrono::TimeDelta::minutes(1));
        assert_eq!(
            store.calls(),
            vec![
                Call::UpsertSource("Open-Meteo".to_string()),
                Call::UpsertMetric("Temperature 2m".to_string(), 1),
                Call::InsertDataPoint(10, MetricValue::Temperature { temp: 19.5 }),
            ]
        );
    }

    #[tokio::test]
    async fn metric_without_usable_sample_writes_nothing() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let defs = metric_feeds();
        let feed = FakeMetricFeed {
            series: BTreeMap::from([(
                defs[1].id.clone(),
                HourlySeries {
                    times: vec![now],
                    values: vec![None],
                },
            )]),
            ..FakeMetricFeed::default()
        };
        let store = FakeStore::default();

        let err = ingest_metric(&feed, &store, &defs[1], now).await.unwrap_err();

        assert!(matches!(err, IngestError::Parse(_)));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn failing_metric_does_not_block_the_other() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let defs = metric_feeds();
        // Only the air-quality feed answers; the weather fetch fails.
        let feed = FakeMetricFeed {
            series: BTreeMap::from([(defs[1].id.clone(), series_around(now, [7.0, 8.0, 9.0]))]),
            ..FakeMetricFeed::default()
        };
        let store = FakeStore::default();

        let results = run_metric_cycle(&feed, &store, &defs, now).await;

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].1, Err(IngestError::Fetch(_))));
        let summary = results[1].1.as_ref().unwrap();
        assert_eq!(summary.metric, MetricKind::Pm25);
        assert_eq!(
            store.calls().last(),
            Some(&Call::InsertDataPoint(10, MetricValue::Pm25 { pm25: 8.0 }))
        );
        assert_eq!(feed.fetches.lock().unwrap().len(), 2);
    }
}
