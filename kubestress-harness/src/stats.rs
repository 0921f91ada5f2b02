//! Aggregation of per-job outcomes into run statistics.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use sketches_ddsketch::DDSketch;

use crate::jobs::JobIndex;

/// The result of processing a single job.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Outcome {
    /// The job this outcome belongs to.
    pub job: JobIndex,
    /// Whether the operation reported success.
    pub success: bool,
    /// Wall-clock duration of the operation call.
    pub duration: Duration,
    /// Size of the payload passed to the operation, in bytes.
    pub payload_size: usize,
}

/// Accumulated statistics of a run.
#[derive(Clone, Default)]
pub struct Statistics {
    /// Number of jobs whose operation succeeded.
    pub success_count: u64,
    /// Number of jobs whose operation failed.
    pub fail_count: u64,
    /// Sum of the durations of all operation calls.
    pub total_elapsed: Duration,
    /// Sum of all payload sizes sent, in bytes.
    pub bytes_sent: u64,
    /// Latencies of successful calls, in seconds.
    pub success_timing: DDSketch,
    /// Latencies of failed calls, in seconds.
    pub failure_timing: DDSketch,
}

impl Statistics {
    /// Total number of recorded outcomes.
    pub fn completed(&self) -> u64 {
        self.success_count + self.fail_count
    }

    /// Fraction of recorded outcomes that failed, `0.0` if nothing was recorded.
    pub fn failure_rate(&self) -> f64 {
        match self.completed() {
            0 => 0.0,
            completed => self.fail_count as f64 / completed as f64,
        }
    }

    fn apply(&mut self, outcome: &Outcome) {
        let seconds = outcome.duration.as_secs_f64();
        if outcome.success {
            self.success_count += 1;
            self.success_timing.add(seconds);
        } else {
            self.fail_count += 1;
            self.failure_timing.add(seconds);
        }
        self.total_elapsed += outcome.duration;
        self.bytes_sent += outcome.payload_size as u64;
    }
}

impl fmt::Debug for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statistics")
            .field("success_count", &self.success_count)
            .field("fail_count", &self.fail_count)
            .field("total_elapsed", &self.total_elapsed)
            .field("bytes_sent", &self.bytes_sent)
            .finish_non_exhaustive()
    }
}

/// Collects [`Outcome`]s from concurrent workers.
///
/// All updates go through a single mutex. Diagnostic logging for sampled jobs happens after the
/// lock is released.
#[derive(Debug)]
pub struct Aggregator {
    statistics: Mutex<Statistics>,
    sample_every: u64,
}

impl Aggregator {
    /// Creates an empty aggregator.
    ///
    /// Successful jobs whose index is below `sample_every` or a multiple of it are logged. `0`
    /// disables sampling.
    pub fn new(sample_every: u64) -> Self {
        Self {
            statistics: Mutex::new(Statistics::default()),
            sample_every,
        }
    }

    /// Folds a single outcome into the statistics.
    pub fn record(&self, outcome: Outcome) {
        // NB: A poisoned lock means a worker panicked mid-update, which voids the run anyway.
        self.statistics.lock().unwrap().apply(&outcome);

        if outcome.success && self.is_sampled(outcome.job) {
            tracing::info!(
                job = %outcome.job,
                duration = ?outcome.duration,
                payload_size = outcome.payload_size,
                "job succeeded"
            );
        }
    }

    /// Returns a copy of the current statistics.
    pub fn snapshot(&self) -> Statistics {
        self.statistics.lock().unwrap().clone()
    }

    /// Number of outcomes recorded so far.
    pub fn completed(&self) -> u64 {
        self.statistics.lock().unwrap().completed()
    }

    fn is_sampled(&self, job: JobIndex) -> bool {
        let index = job.get();
        self.sample_every != 0 && (index < self.sample_every || index % self.sample_every == 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn outcome(job: u64, success: bool) -> Outcome {
        Outcome {
            job: JobIndex::new(job),
            success,
            duration: Duration::from_millis(job + 1),
            payload_size: 100,
        }
    }

    #[test]
    fn counts_successes_and_failures() {
        let aggregator = Aggregator::new(10);
        aggregator.record(outcome(0, true));
        aggregator.record(outcome(1, false));
        aggregator.record(outcome(2, true));

        let stats = aggregator.snapshot();
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.fail_count, 1);
        assert_eq!(stats.completed(), 3);
        assert_eq!(stats.total_elapsed, Duration::from_millis(6));
        assert_eq!(stats.bytes_sent, 300);
        assert_eq!(stats.success_timing.count(), 2);
        assert_eq!(stats.failure_timing.count(), 1);
    }

    #[test]
    fn empty_statistics() {
        let stats = Aggregator::new(0).snapshot();
        assert_eq!(stats.completed(), 0);
        assert_eq!(stats.failure_rate(), 0.0);
    }

    #[test]
    fn failure_rate() {
        let aggregator = Aggregator::new(0);
        for job in 0..4 {
            aggregator.record(outcome(job, job == 0));
        }
        assert_eq!(aggregator.snapshot().failure_rate(), 0.75);
    }

    #[test]
    fn sampling() {
        let aggregator = Aggregator::new(10);
        let sampled: Vec<_> = (0..45)
            .filter(|&job| aggregator.is_sampled(JobIndex::new(job)))
            .collect();
        assert_eq!(sampled, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 20, 30, 40]);

        assert!(!Aggregator::new(0).is_sampled(JobIndex::new(0)));
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let aggregator = Arc::new(Aggregator::new(0));

        let threads: Vec<_> = (0..8)
            .map(|thread| {
                let aggregator = Arc::clone(&aggregator);
                std::thread::spawn(move || {
                    for job in 0..1000 {
                        aggregator.record(outcome(thread * 1000 + job, job % 4 != 0));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let stats = aggregator.snapshot();
        assert_eq!(stats.completed(), 8000);
        assert_eq!(stats.fail_count, 2000);
        assert_eq!(stats.success_count, 6000);
    }
}
