//! Blackbox tests for the dispatch and aggregation guarantees of the harness.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kubestress_harness::{Harness, JobIndex, Operation, Report};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
#[error("job {0} failed on purpose")]
struct Planned(JobIndex);

/// Records every call and fails the jobs selected by `fails`.
#[derive(Debug)]
struct Stub {
    prefix: &'static str,
    fails: fn(u64) -> bool,
    delay: Option<Duration>,
    calls: Mutex<BTreeMap<u64, Vec<usize>>>,
}

impl Stub {
    fn new(fails: fn(u64) -> bool) -> Arc<Self> {
        Arc::new(Self {
            prefix: "",
            fails,
            delay: None,
            calls: Mutex::new(BTreeMap::new()),
        })
    }

    /// Returns the number of calls per index and the payload lengths that were seen.
    fn calls(&self) -> BTreeMap<u64, Vec<usize>> {
        self.calls.lock().unwrap().clone()
    }
}

#[derive(Debug)]
struct StubOperation(Arc<Stub>);

#[async_trait::async_trait]
impl Operation for StubOperation {
    type Response = ();
    type Error = Planned;

    fn name(&self) -> &str {
        "stub"
    }

    fn prefix(&self, _job: JobIndex) -> String {
        self.0.prefix.to_owned()
    }

    async fn execute(&self, job: JobIndex, payload: &str) -> Result<(), Planned> {
        if let Some(delay) = self.0.delay {
            tokio::time::sleep(delay).await;
        }

        self.0
            .calls
            .lock()
            .unwrap()
            .entry(job.get())
            .or_default()
            .push(payload.len());

        if (self.0.fails)(job.get()) {
            Err(Planned(job))
        } else {
            Ok(())
        }
    }
}

async fn run(stub: &Arc<Stub>, total: u64, concurrency: usize, payload_size: usize) -> Report {
    Harness::builder("properties")
        .total(total)
        .concurrency(concurrency)
        .payload_size(payload_size)
        .sample_every(0)
        .build()
        .unwrap()
        .run(StubOperation(Arc::clone(stub)))
        .await
}

fn assert_exactly_once(stub: &Stub, total: u64) {
    let calls = stub.calls();
    assert_eq!(calls.len() as u64, total);
    for (index, (job, payloads)) in calls.iter().enumerate() {
        assert_eq!(index as u64, *job);
        assert_eq!(payloads.len(), 1, "job {job} processed more than once");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dispatches_every_index_exactly_once() {
    kubestress_test::tracing::init();

    let total = 40;
    for concurrency in 1..=total as usize {
        let stub = Stub::new(|_| false);
        let report = run(&stub, total, concurrency, 16).await;

        assert_exactly_once(&stub, total);
        assert_eq!(report.statistics.completed(), total);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn all_successes_are_counted() {
    let stub = Stub::new(|_| false);
    let report = run(&stub, 500, 16, 32).await;

    assert_eq!(report.statistics.success_count, 500);
    assert_eq!(report.statistics.fail_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn planned_failures_are_counted() {
    let stub = Stub::new(|job| job % 7 == 3);
    let report = run(&stub, 700, 13, 32).await;

    assert_eq!(report.statistics.fail_count, 100);
    assert_eq!(report.statistics.success_count, 600);
    assert_eq!(report.statistics.failure_timing.count(), 100);
    assert_eq!(report.statistics.success_timing.count(), 600);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn no_duplicates_under_maximal_contention() {
    let stub = Stub::new(|_| false);
    let report = run(&stub, 1000, 1000, 8).await;

    assert_exactly_once(&stub, 1000);
    assert_eq!(report.statistics.success_count, 1000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn more_workers_do_not_lower_throughput() {
    let slow = |concurrency| async move {
        let stub = Arc::new(Stub {
            prefix: "",
            fails: |_| false,
            delay: Some(Duration::from_millis(5)),
            calls: Mutex::new(BTreeMap::new()),
        });
        run(&stub, 40, concurrency, 16).await.throughput()
    };

    let serial = slow(1).await;
    let parallel = slow(8).await;
    assert!(
        parallel >= serial,
        "throughput dropped from {serial:.1}/s to {parallel:.1}/s"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_outcome_scenario() {
    let stub = Arc::new(Stub {
        prefix: "job-7-",
        fails: |job| job % 10 == 0,
        delay: None,
        calls: Mutex::new(BTreeMap::new()),
    });
    let report = run(&stub, 100, 10, 1024).await;

    assert_eq!(report.statistics.success_count, 90);
    assert_eq!(report.statistics.fail_count, 10);
    assert_exactly_once(&stub, 100);
    assert!(
        stub.calls()
            .values()
            .flatten()
            .all(|&payload_size| payload_size == 1024)
    );
    assert_eq!(report.statistics.bytes_sent, 100 * 1024);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_mid_run_keeps_in_flight_results() {
    kubestress_test::tracing::init();

    let stub = Arc::new(Stub {
        prefix: "",
        fails: |_| false,
        delay: Some(Duration::from_millis(10)),
        calls: Mutex::new(BTreeMap::new()),
    });
    let total = 1000;
    let cancel = CancellationToken::new();

    let harness = Harness::builder("interrupted")
        .total(total)
        .concurrency(4)
        .payload_size(32)
        .sample_every(0)
        .cancellation(cancel.clone())
        .build()
        .unwrap();
    let aggregator = harness.aggregator();

    let interrupt = async {
        while aggregator.completed() < 8 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        cancel.cancel();
    };
    let (report, ()) = tokio::join!(harness.run(StubOperation(Arc::clone(&stub))), interrupt);

    let calls = stub.calls();
    let completed = report.statistics.completed();

    assert!(report.cancelled);
    assert!(completed >= 8, "{completed}");
    assert!(completed < total, "{completed}");

    // Every call that started before the cancellation finished and was recorded exactly once.
    assert_eq!(calls.len() as u64, completed);
    assert!(calls.values().all(|payloads| payloads.len() == 1));
    assert_eq!(report.statistics.success_count, completed);
    assert_eq!(report.statistics.bytes_sent, completed * 32);
}
