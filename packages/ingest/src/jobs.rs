//! Background historical jobs and the single-run lock.
//!
//! Only one historical ingestion may run per process. [`JobRegistry::try_start`]
//! hands out a [`JobHandle`] that holds the lock until it is dropped, and
//! keeps a record of every job so callers can poll a job by id.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ba_urban_ingest_models::{JobRecord, JobScope, JobStatus, YearFailure};
use ba_urban_source::HistoricalFeed;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ingest_all_years;
use crate::store::IngestStore;

/// Returned when a historical job is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Historical ingestion {running} is already running")]
pub struct AlreadyRunning {
    /// Id of the job holding the lock.
    pub running: Uuid,
}

/// Finished jobs kept for polling; older ones are forgotten.
pub const DEFAULT_RETAINED_JOBS: usize = 50;

#[derive(Debug, Default)]
struct Inner {
    running: Option<Uuid>,
    jobs: BTreeMap<Uuid, JobRecord>,
}

impl Inner {
    /// Drops the oldest finished jobs beyond `retain`. The running job is
    /// never dropped.
    fn prune(&mut self, retain: usize) {
        let mut finished: Vec<(DateTime<Utc>, Uuid)> = self
            .jobs
            .values()
            .filter(|job| job.status != JobStatus::Running)
            .map(|job| (job.started_at, job.id))
            .collect();
        if finished.len() <= retain {
            return;
        }

        finished.sort_unstable();
        let excess = finished.len() - retain;
        for (_, id) in finished.into_iter().take(excess) {
            self.jobs.remove(&id);
        }
    }
}

/// In-process record of historical jobs plus the run lock.
#[derive(Debug)]
pub struct JobRegistry {
    inner: Mutex<Inner>,
    retain: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_JOBS)
    }
}

impl JobRegistry {
    /// Creates an empty registry keeping [`DEFAULT_RETAINED_JOBS`]
    /// finished jobs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry keeping at most `retain` finished jobs.
    #[must_use]
    pub fn with_retention(retain: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            retain,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new running job for `scope` and takes the run lock.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyRunning`] if another job still holds the lock.
    pub fn try_start(self: &Arc<Self>, scope: JobScope) -> Result<JobHandle, AlreadyRunning> {
        let mut inner = self.lock();
        if let Some(running) = inner.running {
            return Err(AlreadyRunning { running });
        }

        let id = Uuid::new_v4();
        inner.running = Some(id);
        inner.jobs.insert(id, JobRecord::new(id, scope, Utc::now()));
        drop(inner);

        log::info!("Historical job {id} started ({scope:?})");

        Ok(JobHandle {
            registry: Arc::clone(self),
            id,
        })
    }

    /// Id of the job currently holding the lock.
    #[must_use]
    pub fn running(&self) -> Option<Uuid> {
        self.lock().running
    }

    /// Looks up one job.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<JobRecord> {
        self.lock().jobs.get(&id).cloned()
    }

    /// All jobs, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.lock().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut JobRecord)) {
        if let Some(record) = self.lock().jobs.get_mut(&id) {
            f(record);
        }
    }
}

/// Ownership of the run lock for one job.
///
/// Dropping the handle releases the lock. A job dropped before
/// [`JobHandle::finish`] is marked failed.
#[derive(Debug)]
pub struct JobHandle {
    registry: Arc<JobRegistry>,
    id: Uuid,
}

impl JobHandle {
    /// The job id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Marks the job finished. It fails only when every year failed.
    pub fn finish(self) {
        self.registry.update(self.id, |record| {
            record.status = if record.years.is_empty() && !record.failed_years.is_empty() {
                JobStatus::Failed
            } else {
                JobStatus::Completed
            };
            record.finished_at = Some(Utc::now());
        });
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        self.registry.update(self.id, |record| {
            if record.status == JobStatus::Running {
                record.status = JobStatus::Failed;
                record.finished_at = Some(Utc::now());
                record.error = Some("job ended before finishing".to_string());
            }
        });

        let mut inner = self.registry.lock();
        if inner.running == Some(self.id) {
            inner.running = None;
        }
        inner.prune(self.registry.retain);
        drop(inner);

        log::info!("Historical job {} released the run lock", self.id);
    }
}

/// Runs a historical job to completion, recording each year on the job.
pub async fn run_historical_job(
    job: JobHandle,
    feed: &dyn HistoricalFeed,
    store: &dyn IngestStore,
    years: Vec<i32>,
    batch_size: usize,
) {
    let results = ingest_all_years(feed, store, years, batch_size).await;

    job.registry.update(job.id, |record| {
        for (year, result) in results {
            match result {
                Ok(summary) => record.years.push(summary),
                Err(e) => record.failed_years.push(YearFailure {
                    year,
                    error: e.to_string(),
                }),
            }
        }
    });

    let id = job.id;
    job.finish();

    log::info!("Historical job {id} finished");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::testing::{FakeHistoricalFeed, FakeStore, YearData, valid_row};

    #[test]
    fn second_start_is_refused_while_running() {
        let registry = Arc::new(JobRegistry::new());
        let first = registry.try_start(JobScope::AllYears).unwrap();

        let err = registry.try_start(JobScope::Year(2020)).unwrap_err();
        assert_eq!(err.running, first.id());
        assert_eq!(registry.running(), Some(first.id()));
    }

    #[test]
    fn finishing_releases_the_lock() {
        let registry = Arc::new(JobRegistry::new());
        let first = registry.try_start(JobScope::AllYears).unwrap();
        let first_id = first.id();
        first.finish();

        assert_eq!(registry.running(), None);
        assert_eq!(registry.get(first_id).unwrap().status, JobStatus::Completed);
        assert!(registry.try_start(JobScope::Year(2024)).is_ok());
    }

    #[test]
    fn dropped_job_is_marked_failed_and_unlocked() {
        let registry = Arc::new(JobRegistry::new());
        let job = registry.try_start(JobScope::Year(2019)).unwrap();
        let id = job.id();
        drop(job);

        let record = registry.get(id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.is_some());
        assert_eq!(registry.running(), None);
    }

    #[test]
    fn lists_newest_first() {
        let registry = Arc::new(JobRegistry::new());
        let a = registry.try_start(JobScope::Year(2018)).unwrap();
        let a_id = a.id();
        a.finish();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = registry.try_start(JobScope::Year(2019)).unwrap();
        let b_id = b.id();
        b.finish();

        let ids: Vec<Uuid> = registry.list().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![b_id, a_id]);
    }

    #[test]
    fn keeps_only_the_newest_finished_jobs() {
        let registry = Arc::new(JobRegistry::with_retention(2));
        let mut ids = Vec::new();
        for year in 2018..2022 {
            let job = registry.try_start(JobScope::Year(year)).unwrap();
            ids.push(job.id());
            job.finish();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let kept: Vec<Uuid> = registry.list().into_iter().map(|j| j.id).collect();
        assert_eq!(kept, vec![ids[3], ids[2]]);
        assert!(registry.get(ids[0]).is_none());
    }

    #[test]
    fn running_job_survives_pruning() {
        let registry = Arc::new(JobRegistry::with_retention(0));
        let running = registry.try_start(JobScope::AllYears).unwrap();

        registry.lock().prune(0);

        assert!(registry.get(running.id()).is_some());
    }

    #[test]
    fn unknown_job_is_none() {
        assert!(JobRegistry::new().get(Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn job_records_completed_and_failed_years() {
        let registry = Arc::new(JobRegistry::new());
        let job = registry.try_start(JobScope::AllYears).unwrap();
        let id = job.id();
        let feed = FakeHistoricalFeed {
            years: BTreeMap::from([
                (2019, YearData::Rows(vec![valid_row(0)])),
                (2020, YearData::Unavailable),
            ]),
        };
        let store = FakeStore::default();

        run_historical_job(job, &feed, &store, vec![2019, 2020], 1000).await;

        let record = registry.get(id).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.years.len(), 1);
        assert_eq!(record.years[0].year, 2019);
        assert_eq!(record.failed_years.len(), 1);
        assert_eq!(record.failed_years[0].year, 2020);
        assert!(record.finished_at.is_some());
        assert_eq!(registry.running(), None);
    }

    #[tokio::test]
    async fn job_with_only_failed_years_is_failed() {
        let registry = Arc::new(JobRegistry::new());
        let job = registry.try_start(JobScope::Year(2020)).unwrap();
        let id = job.id();
        let feed = FakeHistoricalFeed::default();
        let store = FakeStore::default();

        run_historical_job(job, &feed, &store, vec![2020], 1000).await;

        assert_eq!(registry.get(id).unwrap().status, JobStatus::Failed);
    }
}
