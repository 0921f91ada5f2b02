//! The harness driver, owning the lifecycle of a single run.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::available_parallelism;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::dispatcher::{Dispatcher, Operation};
use crate::error::HarnessError;
use crate::jobs::JobSource;
use crate::stats::{Aggregator, Statistics};

/// A builder for creating a [`Harness`].
#[derive(Debug)]
pub struct HarnessBuilder {
    name: String,
    concurrency: usize,
    total: u64,
    payload_size: usize,
    sample_every: u64,
    cleanup: bool,
    cancel: CancellationToken,
}

impl HarnessBuilder {
    /// The number of concurrent workers.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// The total number of jobs to run.
    pub fn total(mut self, total: u64) -> Self {
        self.total = total;
        self
    }

    /// The size of every payload in bytes, including its prefix.
    pub fn payload_size(mut self, payload_size: usize) -> Self {
        self.payload_size = payload_size;
        self
    }

    /// Log successful jobs whose index is below `sample_every` or a multiple of it. `0` disables this.
    pub fn sample_every(mut self, sample_every: u64) -> Self {
        self.sample_every = sample_every;
        self
    }

    /// Whether to clean up after successful jobs.
    pub fn cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// A token that stops the run early when cancelled.
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Creates the harness.
    ///
    /// Fails if the configured concurrency is zero.
    pub fn build(self) -> Result<Harness, HarnessError> {
        if self.concurrency == 0 {
            return Err(HarnessError::InvalidConcurrency);
        }

        Ok(Harness {
            name: self.name,
            concurrency: self.concurrency,
            total: self.total,
            payload_size: self.payload_size,
            cleanup: self.cleanup,
            cancel: self.cancel,
            aggregator: Arc::new(Aggregator::new(self.sample_every)),
        })
    }
}

/// A single configured run of an [`Operation`].
#[derive(Debug)]
pub struct Harness {
    name: String,
    concurrency: usize,
    total: u64,
    payload_size: usize,
    cleanup: bool,
    cancel: CancellationToken,
    aggregator: Arc<Aggregator>,
}

impl Harness {
    /// Constructs a new harness builder with the given name.
    pub fn builder(name: impl Into<String>) -> HarnessBuilder {
        HarnessBuilder {
            name: name.into(),
            concurrency: available_parallelism().map_or(1, NonZeroUsize::get),
            total: 0,
            payload_size: 0,
            sample_every: 10,
            cleanup: true,
            cancel: CancellationToken::new(),
        }
    }

    /// The aggregator of this run, for observing progress while it runs.
    pub fn aggregator(&self) -> Arc<Aggregator> {
        Arc::clone(&self.aggregator)
    }

    /// Runs `operation` for every job and waits for all workers to finish.
    pub async fn run<O: Operation>(self, operation: O) -> Report {
        tracing::info!(
            name = %self.name,
            operation = operation.name(),
            total = self.total,
            concurrency = self.concurrency,
            payload_size = self.payload_size,
            "starting run"
        );

        let start = Instant::now();
        let (producer, queue) = JobSource::new(self.total).start(self.cancel.clone());

        Dispatcher::new(operation, self.concurrency, self.payload_size)
            .cleanup(self.cleanup)
            .cancellation(self.cancel.clone())
            .run(queue, &self.aggregator)
            .await;

        if let Err(err) = producer.await
            && err.is_panic()
        {
            std::panic::resume_unwind(err.into_panic());
        }

        let elapsed = start.elapsed();
        let statistics = self.aggregator.snapshot();
        let cancelled = self.cancel.is_cancelled();

        tracing::info!(
            name = %self.name,
            ?elapsed,
            success = statistics.success_count,
            failed = statistics.fail_count,
            cancelled,
            "run finished"
        );

        Report {
            name: self.name,
            concurrency: self.concurrency,
            total: self.total,
            payload_size: self.payload_size,
            elapsed,
            cancelled,
            statistics,
        }
    }
}

/// The summary of a finished run.
#[derive(Clone, Debug)]
pub struct Report {
    /// Name of the run.
    pub name: String,
    /// Number of workers used.
    pub concurrency: usize,
    /// Number of jobs requested.
    pub total: u64,
    /// Size of every payload in bytes.
    pub payload_size: usize,
    /// Wall-clock time of the whole run.
    pub elapsed: Duration,
    /// Whether the run was stopped before all jobs were dispatched.
    pub cancelled: bool,
    /// Final statistics.
    pub statistics: Statistics,
}

impl Report {
    /// Completed jobs per second of wall-clock time.
    pub fn throughput(&self) -> f64 {
        per_second(self.statistics.completed(), self.elapsed)
    }

    /// Successful jobs per second of wall-clock time.
    pub fn success_throughput(&self) -> f64 {
        per_second(self.statistics.success_count, self.elapsed)
    }

    /// Average duration of a single call, if any job completed.
    pub fn average_latency(&self) -> Option<Duration> {
        let completed = u32::try_from(self.statistics.completed()).ok()?;
        self.statistics.total_elapsed.checked_div(completed)
    }
}

/// Rate of `count` events over `elapsed`, or `0` when no time has passed.
pub fn per_second(count: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds == 0.0 {
        return 0.0;
    }
    count as f64 / seconds
}
