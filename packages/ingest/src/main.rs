#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the ba-urban ingestion tool.

use std::sync::Arc;
use std::time::Instant;

use ba_urban_database::{db, queries, run_migrations};
use ba_urban_ingest::scheduler::MetricScheduler;
use ba_urban_ingest::store::DatabaseStore;
use ba_urban_ingest::{ingest_all_years, maintenance, run_metric_cycle};
use ba_urban_source::csv_feed::CsvYearFeed;
use ba_urban_source::open_meteo::OpenMeteoClient;
use ba_urban_source::registry::{historical_feed, metric_feeds};
use chrono::Utc;
use clap::{Parser, Subcommand};
use switchy_database::Database;

#[derive(Parser)]
#[command(name = "ba_urban_ingest", about = "Buenos Aires urban data ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Ingest the historical crime CSVs
    Historical {
        /// Single year to ingest. If not specified, all configured years
        /// are ingested, oldest first.
        #[arg(long)]
        year: Option<i32>,
    },
    /// Run one weather and air-quality cycle
    Metrics,
    /// Run the metric scheduler in the foreground
    Schedule,
    /// List all configured feeds
    Feeds,
    /// List dataset sources stored in the database
    Sources,
    /// Seed the "Security Historical" monthly crime counts
    SeedSecurity,
    /// Delete incidents created by the demo simulator
    CleanupSimulated,
    /// Print incident counts per type
    Types,
    /// Print the most recent incidents as JSON
    Recent {
        /// Number of incidents to print
        #[arg(long, default_value = "5")]
        limit: u32,
    },
}

async fn connect() -> Result<Arc<dyn Database>, Box<dyn std::error::Error>> {
    let db = db::connect_from_env().await?;
    run_migrations(db.as_ref()).await?;
    Ok(Arc::from(db))
}

#[allow(clippy::too_many_lines)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate => {
            let db = db::connect_from_env().await?;
            run_migrations(db.as_ref()).await?;
        }
        Commands::Historical { year } => {
            let store = DatabaseStore::new(connect().await?);
            let definition = historical_feed();
            let years: Vec<i32> = year.map_or_else(|| definition.years().collect(), |y| vec![y]);
            let batch_size = definition.batch_size;
            let feed = CsvYearFeed::new(definition);

            let start = Instant::now();
            let results = ingest_all_years(&feed, &store, years, batch_size).await;

            let mut failed = 0usize;
            for (year, result) in &results {
                match result {
                    Ok(summary) => println!(
                        "{year}: {} inserted, {} rejected of {} rows",
                        summary.inserted, summary.rejected, summary.rows_read
                    ),
                    Err(e) => {
                        failed += 1;
                        println!("{year}: FAILED ({e})");
                    }
                }
            }
            log::info!(
                "Historical ingestion finished in {:.1}s ({failed} of {} years failed)",
                start.elapsed().as_secs_f64(),
                results.len()
            );
        }
        Commands::Metrics => {
            let store = DatabaseStore::new(connect().await?);
            let results =
                run_metric_cycle(&OpenMeteoClient::new(), &store, &metric_feeds(), Utc::now())
                    .await;
            for (id, result) in &results {
                match result {
                    Ok(summary) => println!(
                        "{id}: {} at {} (data point {})",
                        summary.metric, summary.observed_at, summary.data_point_id
                    ),
                    Err(e) => println!("{id}: FAILED ({e})"),
                }
            }
        }
        Commands::Schedule => {
            let store = DatabaseStore::new(connect().await?);
            let scheduler =
                MetricScheduler::new(MetricScheduler::interval_from_env(), metric_feeds());
            scheduler.run(&OpenMeteoClient::new(), &store).await;
        }
        Commands::Feeds => {
            let historical = historical_feed();
            println!("Historical:");
            println!(
                "  {:<28} {}-{}  {}",
                historical.id, historical.first_year, historical.last_year, historical.source.name
            );
            println!("Metrics:");
            for feed in metric_feeds() {
                println!(
                    "  {:<28} {:<16} {} ({})",
                    feed.id,
                    feed.metric.metric_name(),
                    feed.source.name,
                    feed.source.frequency
                );
            }
        }
        Commands::Sources => {
            let db = connect().await?;
            for source in queries::list_dataset_sources(db.as_ref()).await? {
                println!(
                    "{:>4}  {:<28} {:<8} {}",
                    source.id, source.name, source.frequency, source.url
                );
            }
        }
        Commands::SeedSecurity => {
            let store = DatabaseStore::new(connect().await?);
            let written = maintenance::seed_security(&store).await?;
            println!("Seeded {written} records");
        }
        Commands::CleanupSimulated => {
            let db = connect().await?;
            let deleted = maintenance::cleanup_simulated(db.as_ref()).await?;
            println!("Deleted {deleted} simulated incidents");
        }
        Commands::Types => {
            let db = connect().await?;
            for (incident_type, count) in maintenance::incident_type_counts(db.as_ref()).await? {
                println!("{count:>8}  {incident_type}");
            }
        }
        Commands::Recent { limit } => {
            let db = connect().await?;
            let incidents = maintenance::recent_incidents(db.as_ref(), limit).await?;
            println!("{}", serde_json::to_string_pretty(&incidents)?);
        }
    }

    Ok(())
}
