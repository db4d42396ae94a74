use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ErrorInfo, Job, JobState, SummaryResult};

/// Holds jobs by id. Terminal jobs are never modified again.
///
/// Every transition returns `false` when the job is unknown or already terminal.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: Job);

    fn get(&self, id: Uuid) -> Option<Job>;

    fn mark_running(&self, id: Uuid, message: &str) -> bool;

    fn set_progress(&self, id: Uuid, message: &str) -> bool;

    fn complete(&self, id: Uuid, result: SummaryResult) -> bool;

    fn fail(&self, id: Uuid, error: ErrorInfo) -> bool;

    fn cancel(&self, id: Uuid) -> bool;

    /// Drops terminal jobs that finished before `cutoff`, returning how many were removed.
    fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> usize;
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn transition<F>(&self, id: Uuid, apply: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        match jobs.get_mut(&id) {
            Some(job) if !job.state.is_terminal() => {
                apply(job);
                if job.state.is_terminal() {
                    job.finished_at = Some(Utc::now());
                }
                true
            }
            Some(job) => {
                warn!(job_id = %id, state = ?job.state, "ignoring update to finished job");
                false
            }
            None => false,
        }
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: Job) {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id, job);
    }

    fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    fn mark_running(&self, id: Uuid, message: &str) -> bool {
        self.transition(id, |job| {
            job.state = JobState::Running;
            job.progress_message = Some(message.to_string());
        })
    }

    fn set_progress(&self, id: Uuid, message: &str) -> bool {
        self.transition(id, |job| job.progress_message = Some(message.to_string()))
    }

    fn complete(&self, id: Uuid, result: SummaryResult) -> bool {
        self.transition(id, |job| {
            job.state = JobState::Succeeded;
            job.result = Some(result);
        })
    }

    fn fail(&self, id: Uuid, error: ErrorInfo) -> bool {
        self.transition(id, |job| {
            job.state = JobState::Failed;
            job.error = Some(error);
        })
    }

    fn cancel(&self, id: Uuid) -> bool {
        self.transition(id, |job| job.state = JobState::Cancelled)
    }

    fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let before = jobs.len();
        jobs.retain(|_, job| job.finished_at.is_none_or(|at| at >= cutoff));
        before - jobs.len()
    }
}

/// Periodically removes finished jobs older than `ttl`.
pub fn spawn_sweeper(store: Arc<dyn JobStore>, ttl: Duration) -> JoinHandle<()> {
    let period = (ttl / 4).max(Duration::from_secs(1));
    let max_age = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(52));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let removed = store.purge_finished_before(Utc::now() - max_age);
            if removed > 0 {
                debug!(removed, "purged expired job results");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_job() -> (InMemoryJobStore, Uuid) {
        let store = InMemoryJobStore::default();
        let id = Uuid::new_v4();
        store.insert(Job::new(id, "https://example.com"));
        (store, id)
    }

    #[test]
    fn walks_through_success_path() {
        let (store, id) = store_with_job();
        assert_eq!(store.get(id).unwrap().state, JobState::Pending);

        assert!(store.mark_running(id, "Fetching page..."));
        let job = store.get(id).unwrap();
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.progress_message.as_deref(), Some("Fetching page..."));

        assert!(store.set_progress(id, "Summarizing..."));
        assert!(store.complete(id, SummaryResult::no_content()));

        let job = store.get(id).unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.result, Some(SummaryResult::no_content()));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let (store, id) = store_with_job();
        assert!(store.fail(id, ErrorInfo { message: "boom".to_string() }));

        assert!(!store.mark_running(id, "again"));
        assert!(!store.complete(id, SummaryResult::no_content()));
        assert!(!store.cancel(id));

        let job = store.get(id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.result.is_none());
        assert_eq!(job.error.unwrap().message, "boom");
    }

    #[test]
    fn unknown_jobs_are_not_created_by_updates() {
        let store = InMemoryJobStore::default();
        let id = Uuid::new_v4();
        assert!(!store.mark_running(id, "x"));
        assert!(store.get(id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn purge_only_drops_old_finished_jobs() {
        let store = InMemoryJobStore::default();
        let finished = Uuid::new_v4();
        let pending = Uuid::new_v4();
        store.insert(Job::new(finished, "https://a.example"));
        store.insert(Job::new(pending, "https://b.example"));
        store.complete(finished, SummaryResult::no_content());

        assert_eq!(store.purge_finished_before(Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(store.purge_finished_before(Utc::now() + chrono::Duration::seconds(1)), 1);
        assert!(store.get(finished).is_none());
        assert!(store.get(pending).is_some());
    }
}
