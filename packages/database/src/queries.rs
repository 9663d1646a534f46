//! Database query functions for urban data and security incidents.
//!
//! Reference data (sources, metrics) is find-or-create through
//! `ON CONFLICT ... RETURNING id`; observations and incidents are
//! append-only.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use ba_urban_database_models::{
    DataPointRow, DatasetSourceRow, IncidentFilter, IncidentRow, MetricRow,
};
use ba_urban_metric_models::MetricValue;
use ba_urban_source_models::{DatasetSourceConfig, NewIncident};
use chrono::{DateTime, NaiveDateTime, Utc};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::DbError;

/// Postgres bind-parameter limit per statement.
const PG_MAX_PARAMS: usize = 65_535;

/// Columns bound per row by [`insert_incidents`].
const INCIDENT_COLUMNS: usize = 6;

/// Columns bound per row by [`insert_data_points`].
const DATA_POINT_COLUMNS: usize = 3;

/// Payload placeholders stay text-typed; Postgres converts them to `jsonb`.
const JSONB_FROM_TEXT: &str = "::text::jsonb";

const INSERT_DATA_POINT_SQL: &str = "INSERT INTO urban_data (metric_id, value, observed_at)
             VALUES ($1, $2::text::jsonb, $3)
             RETURNING id";

fn data_points_insert_sql(rows: usize) -> String {
    let mut sql = String::from("INSERT INTO urban_data (metric_id, value, observed_at) VALUES ");
    push_value_groups(&mut sql, rows, DATA_POINT_COLUMNS, &[(1, JSONB_FROM_TEXT)]);
    sql
}

fn to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    naive.and_utc()
}

fn conversion(message: impl Into<String>) -> DbError {
    DbError::Conversion {
        message: message.into(),
    }
}

fn encode_value(value: &MetricValue) -> Result<DatabaseValue, DbError> {
    Ok(DatabaseValue::String(serde_json::to_string(value)?))
}

/// Appends `($n, $n+1, ...)` groups for `rows` rows of `columns` columns,
/// numbering from `$1`. `casts` optionally suffixes a column (e.g. `::text::jsonb`).
fn push_value_groups(sql: &mut String, rows: usize, columns: usize, casts: &[(usize, &str)]) {
    let mut param = 1usize;
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for col in 0..columns {
            if col > 0 {
                sql.push_str(", ");
            }
            let _ = write!(sql, "${param}");
            if let Some((_, cast)) = casts.iter().find(|(c, _)| *c == col) {
                sql.push_str(cast);
            }
            param += 1;
        }
        sql.push(')');
    }
}

/// Inserts a dataset source if no source with the same name exists, and
/// returns the id of the stored row either way.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn upsert_dataset_source(
    db: &dyn Database,
    source: &DatasetSourceConfig,
) -> Result<i32, DbError> {
    // The no-op update makes RETURNING yield the existing row's id.
    let rows = db
        .query_raw_params(
            "INSERT INTO dataset_sources (name, url, frequency)
             VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id",
            &[
                DatabaseValue::String(source.name.clone()),
                DatabaseValue::String(source.url.clone()),
                DatabaseValue::String(source.frequency.clone()),
            ],
        )
        .await?;

    let row = rows
        .first()
        .ok_or(DbError::MissingId { table: "dataset_sources" })?;

    let id: i32 = row
        .to_value("id")
        .map_err(|e| conversion(format!("Failed to parse dataset source id: {e}")))?;

    Ok(id)
}

/// Inserts a metric for `dataset_source_id` if none with the same name
/// exists, and returns the id of the stored row either way.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn upsert_metric(
    db: &dyn Database,
    name: &str,
    unit: Option<&str>,
    dataset_source_id: i32,
) -> Result<i32, DbError> {
    let rows = db
        .query_raw_params(
            "INSERT INTO metrics (name, unit, dataset_source_id)
             VALUES ($1, $2, $3)
             ON CONFLICT (name, dataset_source_id) DO UPDATE SET name = EXCLUDED.name
             RETURNING id",
            &[
                DatabaseValue::String(name.to_string()),
                unit.map_or(DatabaseValue::Null, |u| DatabaseValue::String(u.to_string())),
                DatabaseValue::Int32(dataset_source_id),
            ],
        )
        .await?;

    let row = rows
        .first()
        .ok_or(DbError::MissingId { table: "metrics" })?;

    let id: i32 = row
        .to_value("id")
        .map_err(|e| conversion(format!("Failed to parse metric id: {e}")))?;

    Ok(id)
}

/// Writes one observation and returns its id.
///
/// # Errors
///
/// Returns [`DbError`] if the value cannot be encoded or the insert fails.
pub async fn insert_data_point(
    db: &dyn Database,
    metric_id: i32,
    value: &MetricValue,
    observed_at: DateTime<Utc>,
) -> Result<i64, DbError> {
    let rows = db
        .query_raw_params(
            INSERT_DATA_POINT_SQL,
            &[
                DatabaseValue::Int32(metric_id),
                encode_value(value)?,
                DatabaseValue::DateTime(observed_at.naive_utc()),
            ],
        )
        .await?;

    let row = rows
        .first()
        .ok_or(DbError::MissingId { table: "urban_data" })?;

    let id: i64 = row
        .to_value("id")
        .map_err(|e| conversion(format!("Failed to parse data point id: {e}")))?;

    Ok(id)
}

/// Writes many observations of one metric with multi-row inserts.
///
/// # Errors
///
/// Returns [`DbError`] if a value cannot be encoded or an insert fails.
pub async fn insert_data_points(
    db: &dyn Database,
    metric_id: i32,
    points: &[(DateTime<Utc>, MetricValue)],
) -> Result<u64, DbError> {
    let mut inserted = 0u64;

    for chunk in points.chunks(PG_MAX_PARAMS / DATA_POINT_COLUMNS) {
        let sql = data_points_insert_sql(chunk.len());

        let mut params = Vec::with_capacity(chunk.len() * DATA_POINT_COLUMNS);
        for (observed_at, value) in chunk {
            params.push(DatabaseValue::Int32(metric_id));
            params.push(encode_value(value)?);
            params.push(DatabaseValue::DateTime(observed_at.naive_utc()));
        }

        inserted += db.exec_raw_params(&sql, &params).await?;
    }

    Ok(inserted)
}

/// Bulk-inserts normalized incidents and returns the number of rows
/// written. An empty slice performs no statement.
///
/// # Errors
///
/// Returns [`DbError`] if any insert fails.
pub async fn insert_incidents(db: &dyn Database, incidents: &[NewIncident]) -> Result<u64, DbError> {
    let mut inserted = 0u64;

    for chunk in incidents.chunks(PG_MAX_PARAMS / INCIDENT_COLUMNS) {
        let mut sql = String::from(
            "INSERT INTO security_incidents (
                incident_type, description, latitude, longitude, zone, occurred_at
            ) VALUES ",
        );
        push_value_groups(&mut sql, chunk.len(), INCIDENT_COLUMNS, &[]);

        let mut params = Vec::with_capacity(chunk.len() * INCIDENT_COLUMNS);
        for incident in chunk {
            params.push(DatabaseValue::String(incident.incident_type.clone()));
            params.push(DatabaseValue::String(incident.description.clone()));
            params.push(DatabaseValue::Real64(incident.latitude));
            params.push(DatabaseValue::Real64(incident.longitude));
            params.push(
                incident
                    .zone
                    .as_ref()
                    .map_or(DatabaseValue::Null, |z| DatabaseValue::String(z.clone())),
            );
            params.push(DatabaseValue::DateTime(incident.occurred_at.naive_utc()));
        }

        inserted += db.exec_raw_params(&sql, &params).await?;
    }

    Ok(inserted)
}

/// Returns all dataset sources.
///
/// # Errors
///
/// Returns [`DbError`] if the database query fails.
pub async fn list_dataset_sources(db: &dyn Database) -> Result<Vec<DatasetSourceRow>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT id, name, url, frequency, created_at FROM dataset_sources ORDER BY id",
            &[],
        )
        .await?;

    Ok(rows
        .iter()
        .map(|row| DatasetSourceRow {
            id: row.to_value("id").unwrap_or(0),
            name: row.to_value("name").unwrap_or_default(),
            url: row.to_value("url").unwrap_or_default(),
            frequency: row.to_value("frequency").unwrap_or_default(),
            created_at: to_utc(row.to_value("created_at").unwrap_or_default()),
        })
        .collect())
}

/// Returns all metric definitions.
///
/// # Errors
///
/// Returns [`DbError`] if the database query fails.
pub async fn list_metrics(db: &dyn Database) -> Result<Vec<MetricRow>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT id, name, unit, dataset_source_id, created_at FROM metrics ORDER BY id",
            &[],
        )
        .await?;

    Ok(rows
        .iter()
        .map(|row| MetricRow {
            id: row.to_value("id").unwrap_or(0),
            name: row.to_value("name").unwrap_or_default(),
            unit: row.to_value("unit").unwrap_or(None),
            dataset_source_id: row.to_value("dataset_source_id").unwrap_or(0),
            created_at: to_utc(row.to_value("created_at").unwrap_or_default()),
        })
        .collect())
}

/// Returns the most recent observations, newest first, each joined with
/// its metric. When `metric_name` is given only that metric's
/// observations are returned.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored payload is not valid
/// JSON.
pub async fn latest_data_points(
    db: &dyn Database,
    metric_name: Option<&str>,
    limit: u32,
) -> Result<Vec<DataPointRow>, DbError> {
    let mut sql = String::from(
        "SELECT d.id, d.metric_id, d.value::text AS value_json, d.observed_at, d.created_at,
                m.name AS metric_name, m.unit AS metric_unit,
                m.dataset_source_id AS metric_dataset_source_id,
                m.created_at AS metric_created_at
         FROM urban_data d
         JOIN metrics m ON m.id = d.metric_id",
    );
    let mut params = Vec::new();

    if let Some(name) = metric_name {
        params.push(DatabaseValue::String(name.to_string()));
        sql.push_str(" WHERE m.name = $1");
    }

    params.push(DatabaseValue::Int64(i64::from(limit)));
    let _ = write!(
        sql,
        " ORDER BY d.observed_at DESC, d.id DESC LIMIT ${}",
        params.len()
    );

    let rows = db.query_raw_params(&sql, &params).await?;

    rows.iter()
        .map(|row| {
            let value_json: String = row.to_value("value_json").unwrap_or_default();
            let value = serde_json::from_str(&value_json)?;
            let metric_id: i32 = row.to_value("metric_id").unwrap_or(0);

            Ok(DataPointRow {
                id: row.to_value("id").unwrap_or(0),
                metric_id,
                value,
                observed_at: to_utc(row.to_value("observed_at").unwrap_or_default()),
                created_at: to_utc(row.to_value("created_at").unwrap_or_default()),
                metric: MetricRow {
                    id: metric_id,
                    name: row.to_value("metric_name").unwrap_or_default(),
                    unit: row.to_value("metric_unit").unwrap_or(None),
                    dataset_source_id: row.to_value("metric_dataset_source_id").unwrap_or(0),
                    created_at: to_utc(row.to_value("metric_created_at").unwrap_or_default()),
                },
            })
        })
        .collect()
}

/// Returns the most recent incidents, newest first.
///
/// # Errors
///
/// Returns [`DbError`] if the database query fails.
pub async fn latest_incidents(db: &dyn Database, limit: u32) -> Result<Vec<IncidentRow>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT id, incident_type, description, latitude, longitude, zone,
                    occurred_at, created_at
             FROM security_incidents
             ORDER BY occurred_at DESC, id DESC
             LIMIT $1",
            &[DatabaseValue::Int64(i64::from(limit))],
        )
        .await?;

    Ok(rows
        .iter()
        .map(|row| IncidentRow {
            id: row.to_value("id").unwrap_or(0),
            incident_type: row.to_value("incident_type").unwrap_or_default(),
            description: row.to_value("description").unwrap_or_default(),
            latitude: row.to_value("latitude").unwrap_or(0.0),
            longitude: row.to_value("longitude").unwrap_or(0.0),
            zone: row.to_value("zone").unwrap_or(None),
            occurred_at: to_utc(row.to_value("occurred_at").unwrap_or_default()),
            created_at: to_utc(row.to_value("created_at").unwrap_or_default()),
        })
        .collect())
}

/// Builds the `WHERE` clause shared by the filtered incident queries.
///
/// `zone IS NOT NULL` is always present; the year filter uses half-open
/// UTC calendar bounds. Placeholders are numbered from `$1`.
#[must_use]
pub fn incident_filter_clause(filter: &IncidentFilter) -> (String, Vec<DatabaseValue>) {
    let mut sql = String::from(" WHERE zone IS NOT NULL");
    let mut params = Vec::new();

    if let Some((start, end)) = filter.year_bounds() {
        params.push(DatabaseValue::DateTime(start.naive_utc()));
        params.push(DatabaseValue::DateTime(end.naive_utc()));
        let _ = write!(
            sql,
            " AND occurred_at >= ${} AND occurred_at < ${}",
            params.len() - 1,
            params.len()
        );
    }

    if let Some(zone) = &filter.zone {
        params.push(DatabaseValue::String(zone.clone()));
        let _ = write!(sql, " AND zone = ${}", params.len());
    }

    (sql, params)
}

fn counts_from_rows(rows: &[switchy_database::Row], key: &str) -> BTreeMap<String, i64> {
    rows.iter()
        .filter_map(|row| {
            let label: Option<String> = row.to_value(key).unwrap_or(None);
            let count: i64 = row.to_value("count").unwrap_or(0);
            label.map(|label| (label, count))
        })
        .collect()
}

/// Counts incidents per zone, honoring `filter`.
///
/// # Errors
///
/// Returns [`DbError`] if the database query fails.
pub async fn incident_counts_by_zone(
    db: &dyn Database,
    filter: &IncidentFilter,
) -> Result<BTreeMap<String, i64>, DbError> {
    let (where_clause, params) = incident_filter_clause(filter);
    let sql = format!(
        "SELECT zone, COUNT(*)::BIGINT AS count FROM security_incidents{where_clause} GROUP BY zone"
    );

    let rows = db.query_raw_params(&sql, &params).await?;
    Ok(counts_from_rows(&rows, "zone"))
}

/// Counts all incidents per type.
///
/// # Errors
///
/// Returns [`DbError`] if the database query fails.
pub async fn incident_counts_by_type(db: &dyn Database) -> Result<BTreeMap<String, i64>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT incident_type, COUNT(*)::BIGINT AS count
             FROM security_incidents
             GROUP BY incident_type",
            &[],
        )
        .await?;

    Ok(counts_from_rows(&rows, "incident_type"))
}

/// Returns up to `limit` `(latitude, longitude)` pairs, honoring `filter`.
///
/// # Errors
///
/// Returns [`DbError`] if the database query fails.
pub async fn incident_locations(
    db: &dyn Database,
    filter: &IncidentFilter,
    limit: u32,
) -> Result<Vec<(f64, f64)>, DbError> {
    let (where_clause, mut params) = incident_filter_clause(filter);
    params.push(DatabaseValue::Int64(i64::from(limit)));
    let sql = format!(
        "SELECT latitude, longitude FROM security_incidents{where_clause}
         ORDER BY occurred_at DESC LIMIT ${}",
        params.len()
    );

    let rows = db.query_raw_params(&sql, &params).await?;

    Ok(rows
        .iter()
        .map(|row| {
            (
                row.to_value("latitude").unwrap_or(0.0),
                row.to_value("longitude").unwrap_or(0.0),
            )
        })
        .collect())
}

/// Deletes every incident whose type is one of `types`. Returns the number
/// of deleted rows.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn delete_incidents_by_type(db: &dyn Database, types: &[&str]) -> Result<u64, DbError> {
    if types.is_empty() {
        return Ok(0);
    }

    let mut sql = String::from("DELETE FROM security_incidents WHERE incident_type IN ");
    push_value_groups(&mut sql, 1, types.len(), &[]);

    let params: Vec<DatabaseValue> = types
        .iter()
        .map(|t| DatabaseValue::String((*t).to_string()))
        .collect();

    Ok(db.exec_raw_params(&sql, &params).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfiltered_clause_still_excludes_null_zones() {
        let (sql, params) = incident_filter_clause(&IncidentFilter::default());
        assert_eq!(sql, " WHERE zone IS NOT NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn year_filter_keeps_null_zone_exclusion() {
        let filter = IncidentFilter {
            year: Some(2022),
            zone: None,
        };
        let (sql, params) = incident_filter_clause(&filter);
        assert_eq!(
            sql,
            " WHERE zone IS NOT NULL AND occurred_at >= $1 AND occurred_at < $2"
        );
        assert_eq!(params.len(), 2);
        assert!(matches!(
            &params[0],
            DatabaseValue::DateTime(dt) if dt.to_string() == "2022-01-01 00:00:00"
        ));
        assert!(matches!(
            &params[1],
            DatabaseValue::DateTime(dt) if dt.to_string() == "2023-01-01 00:00:00"
        ));
    }

    #[test]
    fn zone_filter_numbers_after_year_bounds() {
        let filter = IncidentFilter {
            year: Some(2022),
            zone: Some("Comuna 3".to_string()),
        };
        let (sql, params) = incident_filter_clause(&filter);
        assert!(sql.ends_with(" AND zone = $3"));
        assert!(matches!(&params[2], DatabaseValue::String(z) if z == "Comuna 3"));
    }

    #[test]
    fn zone_only_filter_starts_at_first_placeholder() {
        let filter = IncidentFilter {
            year: None,
            zone: Some("Comuna 1".to_string()),
        };
        let (sql, params) = incident_filter_clause(&filter);
        assert_eq!(sql, " WHERE zone IS NOT NULL AND zone = $1");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn value_groups_number_placeholders_sequentially() {
        let mut sql = String::new();
        push_value_groups(&mut sql, 2, 3, &[(1, "::cast")]);
        assert_eq!(sql, "($1, $2::cast, $3), ($4, $5::cast, $6)");
    }

    #[test]
    fn data_point_payloads_are_bound_as_text() {
        assert!(INSERT_DATA_POINT_SQL.contains("$2::text::jsonb"));
        assert_eq!(
            data_points_insert_sql(2),
            "INSERT INTO urban_data (metric_id, value, observed_at) VALUES \
             ($1, $2::text::jsonb, $3), ($4, $5::text::jsonb, $6)"
        );
    }

    #[test]
    fn encodes_payload_as_json_text() {
        let value = MetricValue::Pm25 { pm25: 12.5 };
        assert!(matches!(
            encode_value(&value).unwrap(),
            DatabaseValue::String(json) if json == r#"{"pm25":12.5}"#
        ));
    }

    #[test]
    fn chunk_sizes_fit_parameter_limit() {
        assert!((PG_MAX_PARAMS / INCIDENT_COLUMNS) * INCIDENT_COLUMNS <= PG_MAX_PARAMS);
        assert!(PG_MAX_PARAMS / INCIDENT_COLUMNS >= 1000);
    }
}
