//! HTTP handler functions for the ba-urban API.

use std::sync::Arc;

use actix_web::{HttpResponse, web};
use ba_urban_database::queries;
use ba_urban_ingest::jobs::{AlreadyRunning, run_historical_job};
use ba_urban_ingest_models::JobScope;
use ba_urban_server_models::{
    ApiDataPoint, ApiError, ApiHealth, ApiIncident, ApiMetric, ApiTriggerResponse,
    DataQueryParams, IncidentFilterParams, TriggerParams,
};
use uuid::Uuid;

use crate::{AppState, IngestionState};

const DATA_LIMIT: u32 = 50;
const METRIC_DATA_LIMIT: u32 = 20;
const INCIDENT_LIMIT: u32 = 50;
const LOCATION_LIMIT: u32 = 2000;

fn internal_error(message: &str) -> HttpResponse {
    HttpResponse::InternalServerError().json(ApiError::new(message))
}

/// Rows returned by `/data`: fewer when a single metric is requested.
fn data_limit(metric: Option<&str>) -> u32 {
    if metric.is_some() {
        METRIC_DATA_LIMIT
    } else {
        DATA_LIMIT
    }
}

fn trigger_message(year: Option<i32>) -> String {
    year.map_or_else(
        || "Historical ingestion started for all years".to_string(),
        |y| format!("Historical ingestion started for {y}"),
    )
}

/// `GET /health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /data`
///
/// Latest observations, newest first, optionally for one metric name.
pub async fn data(state: web::Data<AppState>, params: web::Query<DataQueryParams>) -> HttpResponse {
    let metric = params.metric.as_deref().filter(|m| !m.is_empty());

    match queries::latest_data_points(state.db.as_ref(), metric, data_limit(metric)).await {
        Ok(rows) => {
            let points: Vec<ApiDataPoint> = rows.into_iter().map(ApiDataPoint::from).collect();
            HttpResponse::Ok().json(points)
        }
        Err(e) => {
            log::error!("Failed to query data points: {e}");
            internal_error("Failed to query data points")
        }
    }
}

/// `GET /metrics`
pub async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    match queries::list_metrics(state.db.as_ref()).await {
        Ok(rows) => {
            let metrics: Vec<ApiMetric> = rows.into_iter().map(ApiMetric::from).collect();
            HttpResponse::Ok().json(metrics)
        }
        Err(e) => {
            log::error!("Failed to query metrics: {e}");
            internal_error("Failed to query metrics")
        }
    }
}

/// `GET /incidents`
pub async fn incidents(state: web::Data<AppState>) -> HttpResponse {
    match queries::latest_incidents(state.db.as_ref(), INCIDENT_LIMIT).await {
        Ok(rows) => {
            let incidents: Vec<ApiIncident> = rows.into_iter().map(ApiIncident::from).collect();
            HttpResponse::Ok().json(incidents)
        }
        Err(e) => {
            log::error!("Failed to query incidents: {e}");
            internal_error("Failed to query incidents")
        }
    }
}

/// `GET /incidents/stats`
///
/// Incident counts per zone, filtered by year and zone.
pub async fn incident_stats(
    state: web::Data<AppState>,
    params: web::Query<IncidentFilterParams>,
) -> HttpResponse {
    let filter = match params.to_filter() {
        Ok(filter) => filter,
        Err(e) => return HttpResponse::BadRequest().json(ApiError::new(e.to_string())),
    };

    match queries::incident_counts_by_zone(state.db.as_ref(), &filter).await {
        Ok(counts) => HttpResponse::Ok().json(counts),
        Err(e) => {
            log::error!("Failed to query incident stats: {e}");
            internal_error("Failed to query incident stats")
        }
    }
}

/// `GET /incidents/stats/type`
pub async fn incident_type_stats(state: web::Data<AppState>) -> HttpResponse {
    match queries::incident_counts_by_type(state.db.as_ref()).await {
        Ok(counts) => HttpResponse::Ok().json(counts),
        Err(e) => {
            log::error!("Failed to query incident type stats: {e}");
            internal_error("Failed to query incident type stats")
        }
    }
}

/// `GET /incidents/locations`
///
/// `[lat, lng]` pairs for the heatmap, with the same filters as
/// `/incidents/stats`.
pub async fn incident_locations(
    state: web::Data<AppState>,
    params: web::Query<IncidentFilterParams>,
) -> HttpResponse {
    let filter = match params.to_filter() {
        Ok(filter) => filter,
        Err(e) => return HttpResponse::BadRequest().json(ApiError::new(e.to_string())),
    };

    match queries::incident_locations(state.db.as_ref(), &filter, LOCATION_LIMIT).await {
        Ok(points) => {
            let pairs: Vec<[f64; 2]> = points.into_iter().map(|(lat, lng)| [lat, lng]).collect();
            HttpResponse::Ok().json(pairs)
        }
        Err(e) => {
            log::error!("Failed to query incident locations: {e}");
            internal_error("Failed to query incident locations")
        }
    }
}

/// `POST /ingestion/trigger-historical`
///
/// Starts a background historical ingestion for one year or every
/// configured year. Only one runs at a time.
pub async fn trigger_historical(
    state: web::Data<IngestionState>,
    params: web::Query<TriggerParams>,
) -> HttpResponse {
    let year = match params.year() {
        Ok(year) => year,
        Err(e) => return HttpResponse::BadRequest().json(ApiError::new(e.to_string())),
    };

    let scope = year.map_or(JobScope::AllYears, JobScope::Year);
    let job = match state.jobs.try_start(scope) {
        Ok(job) => job,
        Err(AlreadyRunning { running }) => {
            log::warn!("Refusing historical trigger: job {running} is still running");
            return HttpResponse::Conflict().json(ApiError {
                error: "Historical ingestion already running".to_string(),
                job_id: Some(running),
            });
        }
    };
    let job_id = job.id();

    let years = year.map_or_else(|| state.years.clone(), |y| vec![y]);
    let batch_size = state.batch_size;
    let feed = Arc::clone(&state.feed);
    let store = Arc::clone(&state.store);

    log::info!("Starting historical job {job_id} for {years:?}");
    actix_web::rt::spawn(async move {
        run_historical_job(job, feed.as_ref(), store.as_ref(), years, batch_size).await;
    });

    HttpResponse::Accepted().json(ApiTriggerResponse {
        message: trigger_message(year),
        job_id,
    })
}

/// `GET /ingestion/jobs`
pub async fn jobs(state: web::Data<IngestionState>) -> HttpResponse {
    HttpResponse::Ok().json(state.jobs.list())
}

/// `GET /ingestion/jobs/{id}`
pub async fn job(state: web::Data<IngestionState>, path: web::Path<String>) -> HttpResponse {
    let Ok(id) = path.parse::<Uuid>() else {
        return HttpResponse::BadRequest().json(ApiError::new(format!(
            "Invalid job id: {:?}",
            path.as_str()
        )));
    };

    state.jobs.get(id).map_or_else(
        || HttpResponse::NotFound().json(ApiError::new(format!("Job {id} not found"))),
        |record| HttpResponse::Ok().json(record),
    )
}
