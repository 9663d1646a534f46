//! Periodic metric ingestion.

use std::time::Duration;

use ba_urban_source::MetricFeed;
use ba_urban_source::feed_def::MetricFeedDefinition;
use chrono::Utc;

use crate::run_metric_cycle;
use crate::store::IngestStore;

/// Seconds between metric cycles when `METRIC_INTERVAL_SECS` is unset.
pub const DEFAULT_INTERVAL_SECS: u64 = 3600;

/// Runs a metric cycle on startup and then once per interval.
pub struct MetricScheduler {
    interval: Duration,
    definitions: Vec<MetricFeedDefinition>,
}

impl MetricScheduler {
    /// Creates a scheduler for `definitions`.
    #[must_use]
    pub const fn new(interval: Duration, definitions: Vec<MetricFeedDefinition>) -> Self {
        Self {
            interval,
            definitions,
        }
    }

    /// Reads the interval from `METRIC_INTERVAL_SECS`, falling back to one
    /// hour when unset, unparseable, or zero.
    #[must_use]
    pub fn interval_from_env() -> Duration {
        Duration::from_secs(parse_interval(
            std::env::var("METRIC_INTERVAL_SECS").ok().as_deref(),
        ))
    }

    /// Runs forever.
    pub async fn run(&self, feed: &dyn MetricFeed, store: &dyn IngestStore) {
        self.run_cycles(feed, store, None).await;
    }

    /// Runs `max_cycles` cycles (forever when `None`). The first cycle
    /// starts immediately.
    pub async fn run_cycles(
        &self,
        feed: &dyn MetricFeed,
        store: &dyn IngestStore,
        max_cycles: Option<usize>,
    ) {
        log::info!(
            "Metric scheduler started: {} feeds every {}s",
            self.definitions.len(),
            self.interval.as_secs()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut cycles = 0usize;
        while max_cycles.is_none_or(|max| cycles < max) {
            ticker.tick().await;
            let results = run_metric_cycle(feed, store, &self.definitions, Utc::now()).await;
            let ok = results.iter().filter(|(_, r)| r.is_ok()).count();
            log::info!("Metric cycle done: {ok}/{} succeeded", results.len());
            cycles += 1;
        }
    }
}

fn parse_interval(value: Option<&str>) -> u64 {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_INTERVAL_SECS)
}
