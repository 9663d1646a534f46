//! One-off maintenance commands: seeding, cleanup, and inspection.

use std::collections::BTreeMap;

use ba_urban_database::{DbError, queries};
use ba_urban_database_models::IncidentRow;
use ba_urban_metric_models::{MetricKind, MetricValue};
use ba_urban_source_models::DatasetSourceConfig;
use chrono::{DateTime, NaiveDate, Utc};
use switchy_database::Database;

use crate::store::IngestStore;

/// Incident types written by the old demo simulator.
pub const SIMULATED_TYPES: &[&str] = &["Assault", "Disturbance", "Theft", "Vandalism"];

const SEED_YEAR: i32 = 2024;
const SEED_ZONES: &[&str] = &[
    "Palermo",
    "Recoleta",
    "Balvanera",
    "Caballito",
    "Belgrano",
    "San Telmo",
    "Flores",
];
const SEED_TYPES: &[&str] = &["Robo con Violencia", "Hurto", "Robo Automotor"];

/// Dataset source the monthly crime counts are seeded under.
#[must_use]
pub fn security_source() -> DatasetSourceConfig {
    DatasetSourceConfig {
        name: "Security Historical".to_string(),
        url: "https://mapa.seguridadciudad.gob.ar/".to_string(),
        frequency: "annual".to_string(),
    }
}

fn zone_base(zone: &str) -> u32 {
    match zone {
        "Palermo" | "Balvanera" => 120,
        "Recoleta" => 80,
        _ => 50,
    }
}

/// Monthly `{zone, type, count}` points for every seed zone and type,
/// dated the 15th of each month.
///
/// Counts vary between 80% and 130% of the zone's base level and are
/// derived from the zone, month, and type so reseeding yields the same
/// data.
#[must_use]
pub fn security_seed_points() -> Vec<(DateTime<Utc>, MetricValue)> {
    let mut points = Vec::with_capacity(SEED_ZONES.len() * 12 * SEED_TYPES.len());

    for (zi, zone) in SEED_ZONES.iter().enumerate() {
        let base = zone_base(zone);
        for month in 1..=12u32 {
            let Some(day) = NaiveDate::from_ymd_opt(SEED_YEAR, month, 15)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
            else {
                continue;
            };
            for (ti, crime_type) in SEED_TYPES.iter().enumerate() {
                let step = (zi * 7 + ti * 5 + month as usize * 3) % 11;
                let percent = 80 + u32::try_from(step).unwrap_or(0) * 5;
                points.push((
                    day.and_utc(),
                    MetricValue::CrimeCount {
                        zone: (*zone).to_string(),
                        crime_type: (*crime_type).to_string(),
                        count: base * percent / 100,
                    },
                ));
            }
        }
    }

    points
}

/// Seeds the "Security Historical" source, its "Crime Count" metric, and
/// the monthly count points. Returns the number of points written.
///
/// # Errors
///
/// Returns [`DbError`] if any write fails.
pub async fn seed_security(store: &dyn IngestStore) -> Result<u64, DbError> {
    let source = security_source();
    let source_id = store.upsert_dataset_source(&source).await?;

    let kind = MetricKind::CrimeCount;
    let metric_id = store
        .upsert_metric(kind.metric_name(), Some(kind.unit()), source_id)
        .await?;

    let points = security_seed_points();
    log::info!("Generating {} historical records...", points.len());
    let written = store.insert_data_points(metric_id, &points).await?;
    log::info!("Seeded {written} crime count points");

    Ok(written)
}

/// Deletes incidents carrying one of the simulator's types.
///
/// # Errors
///
/// Returns [`DbError`] if the delete fails.
pub async fn cleanup_simulated(db: &dyn Database) -> Result<u64, DbError> {
    let deleted = queries::delete_incidents_by_type(db, SIMULATED_TYPES).await?;
    log::info!("Deleted {deleted} simulated incidents");
    Ok(deleted)
}

/// Incident counts per type.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn incident_type_counts(db: &dyn Database) -> Result<BTreeMap<String, i64>, DbError> {
    queries::incident_counts_by_type(db).await
}

/// The `limit` most recent incidents.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn recent_incidents(db: &dyn Database, limit: u32) -> Result<Vec<IncidentRow>, DbError> {
    queries::latest_incidents(db, limit).await
}
