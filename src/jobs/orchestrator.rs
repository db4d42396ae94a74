//! Job submission and the worker pool that executes jobs.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::parse::SummaryParser;
use super::{ErrorInfo, Job, JobStore, SummaryResult, FETCHING_MESSAGE, SUMMARIZING_MESSAGE};
use crate::config::SummaryFormat;
use crate::error::{JobError, SubmitError};
use crate::llm::Summarizer;
use crate::scraper::ContentExtractor;
use crate::validator::UrlValidator;

#[derive(Debug)]
struct QueuedJob {
    id: Uuid,
    url: String,
}

/// Receiving half of the job queue, handed to [`WorkerPool::spawn`].
pub struct JobReceiver(mpsc::Receiver<QueuedJob>);

/// Accepts URLs from the request path and queues them for the workers.
pub struct Orchestrator {
    validator: UrlValidator,
    store: Arc<dyn JobStore>,
    sender: mpsc::Sender<QueuedJob>,
}

impl Orchestrator {
    pub fn new(validator: UrlValidator, store: Arc<dyn JobStore>, capacity: usize) -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        let orchestrator = Self {
            validator,
            store,
            sender,
        };
        (orchestrator, JobReceiver(receiver))
    }

    /// Validates `url` and queues a job for it.
    ///
    /// The queue slot is reserved before the job is stored, so a full or
    /// closed queue never leaves a job behind.
    pub async fn submit(&self, url: &str) -> Result<Uuid, SubmitError> {
        let validated = self.validator.validate(url).await?;

        let permit = self.sender.try_reserve().map_err(|err| {
            warn!(url = %validated.url, error = %err, "could not enqueue job");
            SubmitError::Unavailable
        })?;

        let id = Uuid::new_v4();
        let url = validated.url.to_string();
        self.store.insert(Job::new(id, url.clone()));
        permit.send(QueuedJob { id, url: url.clone() });

        info!(job_id = %id, url = %url, "job queued");
        Ok(id)
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }
}

/// What a worker does with one job.
pub struct Pipeline {
    validator: UrlValidator,
    extractor: Arc<dyn ContentExtractor>,
    summarizer: Arc<dyn Summarizer>,
    store: Arc<dyn JobStore>,
    parser: SummaryParser,
}

impl Pipeline {
    pub fn new(
        validator: UrlValidator,
        extractor: Arc<dyn ContentExtractor>,
        summarizer: Arc<dyn Summarizer>,
        store: Arc<dyn JobStore>,
        format: &SummaryFormat,
    ) -> Self {
        Self {
            validator,
            extractor,
            summarizer,
            store,
            parser: SummaryParser::new(format),
        }
    }

    async fn execute(&self, id: Uuid, url: &str) -> Result<SummaryResult, JobError> {
        self.store.mark_running(id, FETCHING_MESSAGE);

        // DNS answers may have changed since submission.
        let validated = self.validator.validate(url).await?;
        let text = self.extractor.scrape(&validated.url).await?;
        if text.is_empty() {
            info!(job_id = %id, url, "no content extracted");
            return Ok(SummaryResult::no_content());
        }

        self.store.set_progress(id, SUMMARIZING_MESSAGE);
        let raw = self.summarizer.summarize(&text, None).await?;
        Ok(self.parser.parse(&raw))
    }
}

/// Runs one job to a terminal state. A panic inside the pipeline fails the job.
async fn run_job(pipeline: Arc<Pipeline>, job: QueuedJob) {
    let QueuedJob { id, url } = job;
    let store = pipeline.store.clone();

    let task = {
        let url = url.clone();
        tokio::spawn(async move { pipeline.execute(id, &url).await })
    };
    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(err) => Err(JobError::Aborted(err.to_string())),
    };

    match outcome {
        Ok(result) => {
            info!(job_id = %id, url = %url, title = %result.title, "job succeeded");
            store.complete(id, result);
        }
        Err(err) => {
            match &err {
                JobError::Validation(_) => warn!(job_id = %id, url = %url, error = %err, "job rejected"),
                _ => error!(job_id = %id, url = %url, error = ?err, "job failed"),
            }
            store.fail(id, ErrorInfo { message: err.user_message() });
        }
    }
}

/// Fixed set of tokio tasks draining the job queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    store: Arc<dyn JobStore>,
}

impl WorkerPool {
    pub fn spawn(receiver: JobReceiver, workers: usize, pipeline: Arc<Pipeline>) -> Self {
        let receiver = Arc::new(Mutex::new(receiver.0));
        let (shutdown, _) = watch::channel(false);
        let store = pipeline.store.clone();

        let handles = (0..workers.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                let pipeline = pipeline.clone();
                let mut stop = shutdown.subscribe();

                tokio::spawn(async move {
                    debug!(worker, "worker started");
                    loop {
                        let next = {
                            let mut queue = receiver.lock().await;
                            tokio::select! {
                                biased;
                                _ = stop.changed() => None,
                                job = queue.recv() => job,
                            }
                        };
                        match next {
                            Some(job) => run_job(pipeline.clone(), job).await,
                            None => break,
                        }
                    }
                    debug!(worker, "worker stopped");
                })
            })
            .collect();

        Self {
            handles,
            shutdown,
            receiver,
            store,
        }
    }

    /// Lets running jobs finish, then cancels everything still queued.
    /// Returns the number of cancelled jobs.
    pub async fn shutdown(self) -> usize {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(error = %err, "worker task ended abnormally");
            }
        }

        let mut queue = self.receiver.lock().await;
        queue.close();
        let mut cancelled = 0;
        while let Ok(job) = queue.try_recv() {
            if self.store.cancel(job.id) {
                cancelled += 1;
            }
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ScrapeError, SummarizationError, ValidationError, GENERIC_JOB_FAILURE};
    use crate::jobs::{InMemoryJobStore, JobState};
    use crate::validator::{addr, StaticResolver};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use url::Url;

    struct FixedPage(&'static str);

    #[async_trait]
    impl ContentExtractor for FixedPage {
        async fn scrape(&self, _url: &Url) -> Result<String, ScrapeError> {
            Ok(self.0.to_string())
        }
    }

    struct UnreachablePage;

    #[async_trait]
    impl ContentExtractor for UnreachablePage {
        async fn scrape(&self, url: &Url) -> Result<String, ScrapeError> {
            Err(ScrapeError::Status {
                status: reqwest::StatusCode::BAD_GATEWAY,
                url: url.to_string(),
            })
        }
    }

    #[derive(Default)]
    struct CountingSummarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn summarize(&self, _text: &str, _max_chars: Option<usize>) -> Result<String, SummarizationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("Title: Example\nKey points:\n- one\n- two".to_string())
        }
    }

    struct BrokenSummarizer;

    #[async_trait]
    impl Summarizer for BrokenSummarizer {
        async fn summarize(&self, _text: &str, _max_chars: Option<usize>) -> Result<String, SummarizationError> {
            Err(SummarizationError::MissingField)
        }
    }

    struct PanickingSummarizer;

    #[async_trait]
    impl Summarizer for PanickingSummarizer {
        async fn summarize(&self, _text: &str, _max_chars: Option<usize>) -> Result<String, SummarizationError> {
            panic!("backend client bug")
        }
    }

    fn validator() -> UrlValidator {
        UrlValidator::new(Arc::new(StaticResolver::new(vec![
            ("example.com", vec![addr("93.184.216.34")]),
            ("rebound.example", vec![addr("10.0.0.5")]),
        ])))
    }

    struct Harness {
        orchestrator: Orchestrator,
        store: Arc<InMemoryJobStore>,
        pool: WorkerPool,
    }

    fn harness(extractor: Arc<dyn ContentExtractor>, summarizer: Arc<dyn Summarizer>) -> Harness {
        harness_with_worker_validator(extractor, summarizer, validator())
    }

    fn harness_with_worker_validator(
        extractor: Arc<dyn ContentExtractor>,
        summarizer: Arc<dyn Summarizer>,
        worker_validator: UrlValidator,
    ) -> Harness {
        let store = Arc::new(InMemoryJobStore::default());
        let (orchestrator, receiver) = Orchestrator::new(validator(), store.clone(), 8);
        let pipeline = Arc::new(Pipeline::new(
            worker_validator,
            extractor,
            summarizer,
            store.clone(),
            &SummaryFormat::default(),
        ));
        let pool = WorkerPool::spawn(receiver, 2, pipeline);
        Harness { orchestrator, store, pool }
    }

    async fn wait_until_finished(store: &InMemoryJobStore, id: Uuid) -> Job {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(job) = store.get(id) {
                    if job.state.is_terminal() {
                        return job;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("job did not finish in time")
    }

    #[tokio::test]
    async fn successful_job_stores_parsed_summary() {
        let summarizer = Arc::new(CountingSummarizer::default());
        let h = harness(Arc::new(FixedPage("Some article text")), summarizer.clone());

        let id = h.orchestrator.submit("https://example.com/post").await.unwrap();
        let job = wait_until_finished(&h.store, id).await;

        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.url, "https://example.com/post");
        let result = job.result.unwrap();
        assert_eq!(result.title, "Example");
        assert_eq!(result.bullet_summary, "- one\n- two");
        assert!(job.error.is_none());
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_page_succeeds_without_summarizing() {
        let summarizer = Arc::new(CountingSummarizer::default());
        let h = harness(Arc::new(FixedPage("")), summarizer.clone());

        let id = h.orchestrator.submit("https://example.com/").await.unwrap();
        let job = wait_until_finished(&h.store, id).await;

        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.result, Some(SummaryResult::no_content()));
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_url_never_creates_a_job() {
        let h = harness(Arc::new(FixedPage("text")), Arc::new(CountingSummarizer::default()));

        let err = h.orchestrator.submit("ftp://example.com").await.unwrap_err();
        assert!(matches!(err, SubmitError::Invalid(ValidationError::UnsupportedScheme)));

        let err = h.orchestrator.submit("http://rebound.example").await.unwrap_err();
        assert!(matches!(err, SubmitError::Invalid(ValidationError::HostNotAllowed)));

        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn backend_failures_are_sanitized() {
        let h = harness(Arc::new(FixedPage("text")), Arc::new(BrokenSummarizer));

        let id = h.orchestrator.submit("https://example.com").await.unwrap();
        let job = wait_until_finished(&h.store, id).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.unwrap().message, GENERIC_JOB_FAILURE);
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn scrape_failures_are_sanitized() {
        let h = harness(Arc::new(UnreachablePage), Arc::new(CountingSummarizer::default()));

        let id = h.orchestrator.submit("https://example.com").await.unwrap();
        let job = wait_until_finished(&h.store, id).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.unwrap().message, GENERIC_JOB_FAILURE);
    }

    #[tokio::test]
    async fn panicking_job_is_marked_failed() {
        let h = harness(Arc::new(FixedPage("text")), Arc::new(PanickingSummarizer));

        let id = h.orchestrator.submit("https://example.com").await.unwrap();
        let job = wait_until_finished(&h.store, id).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.unwrap().message, GENERIC_JOB_FAILURE);

        // The worker survives and keeps serving the queue.
        let second = h.orchestrator.submit("https://example.com/again").await.unwrap();
        assert_eq!(wait_until_finished(&h.store, second).await.state, JobState::Failed);
    }

    #[tokio::test]
    async fn revalidation_failure_surfaces_message() {
        // The host resolved publicly at submission but internally by the time the worker ran.
        let worker_validator = UrlValidator::new(Arc::new(StaticResolver::new(vec![(
            "example.com",
            vec![addr("127.0.0.1")],
        )])));
        let h = harness_with_worker_validator(
            Arc::new(FixedPage("text")),
            Arc::new(CountingSummarizer::default()),
            worker_validator,
        );

        let id = h.orchestrator.submit("https://example.com").await.unwrap();
        let job = wait_until_finished(&h.store, id).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.unwrap().message, "The specified host is not allowed.");
    }

    #[tokio::test]
    async fn closed_queue_rejects_without_storing() {
        let store = Arc::new(InMemoryJobStore::default());
        let (orchestrator, receiver) = Orchestrator::new(validator(), store.clone(), 4);
        drop(receiver);

        let err = orchestrator.submit("https://example.com").await.unwrap_err();
        assert!(matches!(err, SubmitError::Unavailable));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn full_queue_rejects_without_storing() {
        let store = Arc::new(InMemoryJobStore::default());
        let (orchestrator, _receiver) = Orchestrator::new(validator(), store.clone(), 1);

        orchestrator.submit("https://example.com/1").await.unwrap();
        let err = orchestrator.submit("https://example.com/2").await.unwrap_err();

        assert!(matches!(err, SubmitError::Unavailable));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_cancels_queued_jobs() {
        let store = Arc::new(InMemoryJobStore::default());
        let (orchestrator, receiver) = Orchestrator::new(validator(), store.clone(), 4);
        let first = orchestrator.submit("https://example.com/1").await.unwrap();
        let second = orchestrator.submit("https://example.com/2").await.unwrap();

        let pipeline = Arc::new(Pipeline::new(
            validator(),
            Arc::new(FixedPage("text")),
            Arc::new(CountingSummarizer::default()),
            store.clone(),
            &SummaryFormat::default(),
        ));
        let pool = WorkerPool::spawn(receiver, 1, pipeline);
        let cancelled = pool.shutdown().await;

        let states: Vec<JobState> = [first, second]
            .iter()
            .map(|id| store.get(*id).unwrap().state)
            .collect();
        assert!(states.iter().all(|s| s.is_terminal()));
        let cancelled_count = states.iter().filter(|s| **s == JobState::Cancelled).count();
        assert_eq!(cancelled, cancelled_count);
        assert!(orchestrator.submit("https://example.com/3").await.is_err());
    }

    #[tokio::test]
    async fn pool_shuts_down_cleanly_when_idle() {
        let h = harness(Arc::new(FixedPage("text")), Arc::new(CountingSummarizer::default()));
        assert_eq!(h.pool.shutdown().await, 0);
    }
}
