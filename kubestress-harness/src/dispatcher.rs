//! A fixed-size worker pool that runs an [`Operation`] for every job.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::jobs::{JobIndex, JobQueue};
use crate::payload;
use crate::stats::{Aggregator, Outcome};

/// The remote operation exercised by the harness.
///
/// The harness calls [`execute`](Self::execute) once per job with a payload that starts with
/// [`prefix`](Self::prefix) and is padded to the configured size. Any `Err` is recorded as a failed
/// attempt and never stops the run. Attempts are not retried.
#[async_trait::async_trait]
pub trait Operation: Debug + Send + Sync + 'static {
    /// Value returned by a successful call, handed to [`cleanup`](Self::cleanup).
    type Response: Send + 'static;
    /// Error returned by a failed call.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The operation name, used for diagnostics.
    fn name(&self) -> &str;

    /// The prefix of the payload for the given job.
    fn prefix(&self, _job: JobIndex) -> String {
        String::new()
    }

    /// Performs the operation for a single job.
    async fn execute(&self, job: JobIndex, payload: &str) -> Result<Self::Response, Self::Error>;

    /// Releases remote resources created by a successful [`execute`](Self::execute).
    ///
    /// Cleanup is best effort. It is neither timed nor counted in the run statistics.
    async fn cleanup(&self, _job: JobIndex, _response: Self::Response) {}
}

/// Runs an [`Operation`] on a fixed number of concurrent workers.
#[derive(Debug)]
pub struct Dispatcher<O> {
    operation: Arc<O>,
    concurrency: usize,
    payload_size: usize,
    cleanup: bool,
    cancel: CancellationToken,
}

impl<O: Operation> Dispatcher<O> {
    /// Creates a dispatcher with `concurrency` workers.
    pub fn new(operation: O, concurrency: usize, payload_size: usize) -> Self {
        Self {
            operation: Arc::new(operation),
            concurrency,
            payload_size,
            cleanup: true,
            cancel: CancellationToken::new(),
        }
    }

    /// Whether [`Operation::cleanup`] runs after successful jobs. Defaults to `true`.
    pub fn cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Stops workers from pulling new jobs once `cancel` fires.
    ///
    /// Calls that are already in flight are allowed to finish.
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Processes jobs from `queue` until it is exhausted or the run is cancelled.
    ///
    /// Returns once every worker has exited. A panic inside a worker is propagated to the caller.
    pub async fn run(&self, queue: JobQueue, aggregator: &Arc<Aggregator>) {
        let mut workers = JoinSet::new();
        for worker in 0..self.concurrency {
            let context = WorkerContext {
                worker,
                operation: Arc::clone(&self.operation),
                queue: queue.clone(),
                aggregator: Arc::clone(aggregator),
                payload_size: self.payload_size,
                cleanup: self.cleanup,
                cancel: self.cancel.clone(),
            };
            workers.spawn(context.run());
        }
        drop(queue);

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined
                && err.is_panic()
            {
                std::panic::resume_unwind(err.into_panic());
            }
        }
    }
}

struct WorkerContext<O> {
    worker: usize,
    operation: Arc<O>,
    queue: JobQueue,
    aggregator: Arc<Aggregator>,
    payload_size: usize,
    cleanup: bool,
    cancel: CancellationToken,
}

impl<O: Operation> WorkerContext<O> {
    async fn run(self) {
        let mut processed = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                job = self.queue.next() => job,
            };
            let Some(job) = next else {
                break;
            };

            let payload = payload::synthesize(self.payload_size, &self.operation.prefix(job));
            if self.cancel.is_cancelled() {
                break;
            }

            let start = Instant::now();
            let result = self.operation.execute(job, &payload).await;
            let duration = start.elapsed();

            let (success, response) = match result {
                Ok(response) => (true, Some(response)),
                Err(err) => {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        operation = self.operation.name(),
                        %job,
                        ?duration,
                        payload_size = payload.len(),
                        "job failed"
                    );
                    (false, None)
                }
            };

            self.aggregator.record(Outcome {
                job,
                success,
                duration,
                payload_size: payload.len(),
            });
            processed += 1;

            drop(payload);
            if self.cleanup
                && let Some(response) = response
            {
                self.operation.cleanup(job, response).await;
            }
        }

        tracing::trace!(worker = self.worker, processed, "worker finished");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::jobs::JobSource;

    #[derive(Debug, thiserror::Error)]
    #[error("rejected job {0}")]
    struct Rejected(JobIndex);

    #[derive(Debug, Default)]
    struct Recorder {
        seen: Mutex<Vec<JobIndex>>,
        cleaned: Mutex<Vec<JobIndex>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Operation for Arc<Recorder> {
        type Response = JobIndex;
        type Error = Rejected;

        fn name(&self) -> &str {
            "recorder"
        }

        fn prefix(&self, job: JobIndex) -> String {
            format!("job-{job}-")
        }

        async fn execute(&self, job: JobIndex, payload: &str) -> Result<JobIndex, Rejected> {
            assert!(payload.starts_with(&format!("job-{job}-")));

            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.seen.lock().unwrap().push(job);
            if job.get() % 3 == 0 {
                return Err(Rejected(job));
            }
            Ok(job)
        }

        async fn cleanup(&self, job: JobIndex, response: JobIndex) {
            assert_eq!(job, response);
            self.cleaned.lock().unwrap().push(job);
        }
    }

    async fn dispatch(
        recorder: &Arc<Recorder>,
        total: u64,
        concurrency: usize,
        cleanup: bool,
    ) -> Arc<Aggregator> {
        let aggregator = Arc::new(Aggregator::new(0));
        let (producer, queue) = JobSource::new(total).start(CancellationToken::new());

        Dispatcher::new(Arc::clone(recorder), concurrency, 64)
            .cleanup(cleanup)
            .run(queue, &aggregator)
            .await;
        producer.await.unwrap();

        aggregator
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn processes_every_job_once() {
        let recorder = Arc::new(Recorder::default());
        let aggregator = dispatch(&recorder, 30, 4, true).await;

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 30);
        assert_eq!(seen.iter().copied().collect::<BTreeSet<_>>().len(), 30);

        let stats = aggregator.snapshot();
        assert_eq!(stats.fail_count, 10);
        assert_eq!(stats.success_count, 20);
        assert_eq!(stats.bytes_sent, 30 * 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn respects_concurrency_limit() {
        let recorder = Arc::new(Recorder::default());
        dispatch(&recorder, 200, 3, true).await;

        assert!(recorder.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn cleans_up_successful_jobs_only() {
        let recorder = Arc::new(Recorder::default());
        dispatch(&recorder, 9, 2, true).await;

        let mut cleaned: Vec<_> = recorder.cleaned.lock().unwrap().iter().map(|j| j.get()).collect();
        cleaned.sort_unstable();
        assert_eq!(cleaned, [1, 2, 4, 5, 7, 8]);
    }

    #[tokio::test]
    async fn cleanup_can_be_disabled() {
        let recorder = Arc::new(Recorder::default());
        dispatch(&recorder, 9, 2, false).await;

        assert!(recorder.cleaned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_start_processes_nothing() {
        let recorder = Arc::new(Recorder::default());
        let aggregator = Arc::new(Aggregator::new(0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (producer, queue) = JobSource::new(100).start(cancel.clone());
        Dispatcher::new(Arc::clone(&recorder), 4, 16)
            .cancellation(cancel)
            .run(queue, &aggregator)
            .await;
        producer.await.unwrap();

        assert_eq!(aggregator.completed(), 0);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[derive(Debug)]
    struct Exploding;

    #[async_trait::async_trait]
    impl Operation for Exploding {
        type Response = ();
        type Error = Rejected;

        fn name(&self) -> &str {
            "exploding"
        }

        async fn execute(&self, job: JobIndex, _payload: &str) -> Result<(), Rejected> {
            if job.get() == 2 {
                panic!("worker crashed");
            }
            Ok(())
        }
    }

    #[tokio::test]
    #[should_panic(expected = "worker crashed")]
    async fn worker_panics_propagate() {
        let aggregator = Arc::new(Aggregator::new(0));
        let (_producer, queue) = JobSource::new(10).start(CancellationToken::new());

        Dispatcher::new(Exploding, 2, 8)
            .run(queue, &aggregator)
            .await;
    }
}
