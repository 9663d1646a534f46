#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the ba-urban dashboard.
//!
//! Serves read-only JSON views over the urban data and security incident
//! tables, accepts background historical ingestion triggers, and runs the
//! hourly metric scheduler on the server's runtime.

mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, Scope, middleware, web};
use ba_urban_database::{db, run_migrations};
use ba_urban_ingest::jobs::JobRegistry;
use ba_urban_ingest::scheduler::MetricScheduler;
use ba_urban_ingest::store::{DatabaseStore, IngestStore};
use ba_urban_source::HistoricalFeed;
use ba_urban_source::csv_feed::CsvYearFeed;
use ba_urban_source::open_meteo::OpenMeteoClient;
use ba_urban_source::registry::{historical_feed, metric_feeds};
use switchy_database::Database;

/// Shared state of the read endpoints.
pub struct AppState {
    /// Database connection for read queries.
    pub db: Arc<dyn Database>,
}

/// Shared state of the `/ingestion` endpoints.
pub struct IngestionState {
    /// Background historical jobs and the run lock.
    pub jobs: Arc<JobRegistry>,
    /// Historical feed the jobs download from.
    pub feed: Arc<dyn HistoricalFeed>,
    /// Write port the jobs insert through.
    pub store: Arc<dyn IngestStore>,
    /// Years an all-years trigger covers, oldest first.
    pub years: Vec<i32>,
    /// Accepted rows per bulk insert.
    pub batch_size: usize,
}

/// Routes under `/ingestion`. They read [`IngestionState`].
#[must_use]
pub fn ingestion_scope() -> Scope {
    web::scope("/ingestion")
        .route(
            "/trigger-historical",
            web::post().to(handlers::trigger_historical),
        )
        .route("/jobs", web::get().to(handlers::jobs))
        .route("/jobs/{id}", web::get().to(handlers::job))
}

/// Whether `RUN_SCHEDULER` leaves the metric scheduler enabled. Anything
/// other than `0`, `false`, `no`, or `off` (case-insensitive) enables it.
fn scheduler_enabled(value: Option<&str>) -> bool {
    value.is_none_or(|v| {
        !matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        )
    })
}

/// Starts the API server.
///
/// Connects to the database, runs migrations, spawns the metric
/// scheduler (unless `RUN_SCHEDULER` disables it), and serves HTTP until
/// shutdown. This is a regular async function; the caller provides the
/// actix runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the database is unreachable,
/// migrations fail, or the HTTP server fails to bind.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    log::info!("Connecting to database...");
    let db_conn = db::connect_from_env()
        .await
        .map_err(|e| std::io::Error::other(format!("Failed to connect to database: {e}")))?;

    log::info!("Running migrations...");
    run_migrations(db_conn.as_ref())
        .await
        .map_err(|e| std::io::Error::other(format!("Failed to run migrations: {e}")))?;

    let db: Arc<dyn Database> = Arc::from(db_conn);
    let store = DatabaseStore::new(Arc::clone(&db));

    if scheduler_enabled(std::env::var("RUN_SCHEDULER").ok().as_deref()) {
        let scheduler = MetricScheduler::new(MetricScheduler::interval_from_env(), metric_feeds());
        let store = store.clone();
        actix_web::rt::spawn(async move {
            scheduler.run(&OpenMeteoClient::new(), &store).await;
        });
    } else {
        log::info!("Metric scheduler disabled by RUN_SCHEDULER");
    }

    let definition = historical_feed();
    let ingestion = web::Data::new(IngestionState {
        jobs: Arc::new(JobRegistry::new()),
        years: definition.years().collect(),
        batch_size: definition.batch_size,
        feed: Arc::new(CsvYearFeed::new(definition)),
        store: Arc::new(store),
    });
    let state = web::Data::new(AppState { db });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .app_data(ingestion.clone())
            .route("/health", web::get().to(handlers::health))
            .route("/data", web::get().to(handlers::data))
            .route("/metrics", web::get().to(handlers::metrics))
            .route("/incidents", web::get().to(handlers::incidents))
            .route("/incidents/stats", web::get().to(handlers::incident_stats))
            .route(
                "/incidents/stats/type",
                web::get().to(handlers::incident_type_stats),
            )
            .route(
                "/incidents/locations",
                web::get().to(handlers::incident_locations),
            )
            .service(ingestion_scope())
    })
    .bind((bind_addr, port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_runs_unless_disabled() {
        assert!(scheduler_enabled(None));
        assert!(scheduler_enabled(Some("1")));
        assert!(scheduler_enabled(Some("true")));
        assert!(!scheduler_enabled(Some("0")));
        assert!(!scheduler_enabled(Some("False")));
        assert!(!scheduler_enabled(Some(" off ")));
    }
}
