use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One executing job, as seen by the monitor.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub worker_class: String,
    pub queue: String,
    pub started_at: Instant,
    cancel: CancellationToken,
    seq: u64,
}

impl JobRecord {
    pub(crate) fn new(
        job_id: &str,
        worker_class: &str,
        queue: &str,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            worker_class: worker_class.to_string(),
            queue: queue.to_string(),
            started_at: Instant::now(),
            cancel,
            seq: 0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct Jobs {
    by_id: HashMap<String, JobRecord>,
    next_seq: u64,
}

/// Registry of jobs executing in this process.
///
/// Every read and write happens under one mutex. Only the monitor registers
/// and removes jobs; everyone else gets read access through [`with_jobs`](Self::with_jobs).
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<Jobs>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Jobs> {
        // The lock is never held across job code, so a poisoned guard still holds consistent data.
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a job. The returned guard removes it again when dropped.
    ///
    /// Re-registering a job id replaces the earlier record; the earlier guard
    /// then leaves the new record alone.
    pub(crate) fn register(&self, mut record: JobRecord) -> JobGuard<'_> {
        let mut jobs = self.lock();
        jobs.next_seq += 1;
        record.seq = jobs.next_seq;
        let guard = JobGuard {
            registry: self,
            job_id: record.job_id.clone(),
            seq: record.seq,
        };
        jobs.by_id.insert(record.job_id.clone(), record);
        guard
    }

    fn remove(&self, job_id: &str, seq: u64) -> bool {
        let mut jobs = self.lock();
        match jobs.by_id.get(job_id) {
            Some(record) if record.seq == seq => {
                jobs.by_id.remove(job_id);
                true
            }
            _ => false,
        }
    }

    /// Cancel a running job. Returns false when the job is not running here.
    pub(crate) fn cancel(&self, job_id: &str) -> bool {
        let jobs = self.lock();
        match jobs.by_id.get(job_id) {
            Some(record) => {
                record.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Run `f` with the registry locked. Do not block inside `f`.
    pub fn with_jobs<R>(&self, f: impl FnOnce(&HashMap<String, JobRecord>) -> R) -> R {
        let jobs = self.lock();
        f(&jobs.by_id)
    }

    pub fn snapshot(&self) -> Vec<JobRecord> {
        self.with_jobs(|jobs| jobs.values().cloned().collect())
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.with_jobs(|jobs| jobs.contains_key(job_id))
    }

    pub fn len(&self) -> usize {
        self.with_jobs(|jobs| jobs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn any_jobs(&self) -> bool {
        !self.is_empty()
    }
}

/// Removes its job from the registry on drop, whatever way the job ended.
#[must_use = "dropping the guard unregisters the job"]
pub(crate) struct JobGuard<'a> {
    registry: &'a JobRegistry,
    job_id: String,
    seq: u64,
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.job_id, self.seq);
    }
}
