//! The job source hands out job indices to workers.
//!
//! A single producer task pushes `0..total` into a channel with a capacity of one. Workers share
//! the receiving end through a [`JobQueue`], so whichever worker is free picks up the next index
//! and the producer is throttled to the rate at which workers consume.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Identifier of a single job within a run.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JobIndex(u64);

impl JobIndex {
    /// Creates a job index.
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    /// Returns the numeric value of this index.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produces the job indices `0..total` for a single run.
///
/// The source can only be started once. To run the same jobs again, construct a new source.
#[derive(Debug)]
pub struct JobSource {
    total: u64,
}

impl JobSource {
    /// Creates a source for `total` jobs.
    pub fn new(total: u64) -> Self {
        Self { total }
    }

    /// The number of jobs this source produces.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Spawns the producer and returns its handle along with the queue workers pull from.
    ///
    /// The producer stops early if `cancel` fires or if every [`JobQueue`] handle was dropped.
    /// The queue reports exhaustion once the producer has finished.
    pub fn start(self, cancel: CancellationToken) -> (JoinHandle<()>, JobQueue) {
        let (sender, receiver) = mpsc::channel(1);
        let total = self.total;

        let producer = tokio::spawn(async move {
            for index in 0..total {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!(produced = index, total, "job source cancelled");
                        break;
                    }
                    sent = sender.send(JobIndex(index)) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let queue = JobQueue {
            receiver: Arc::new(Mutex::new(receiver)),
        };

        (producer, queue)
    }
}

/// A shared handle that hands out each job index to exactly one caller.
#[derive(Clone, Debug)]
pub struct JobQueue {
    receiver: Arc<Mutex<mpsc::Receiver<JobIndex>>>,
}

impl JobQueue {
    /// Waits for the next job index.
    ///
    /// Returns `None` once all jobs have been handed out and the producer finished.
    pub async fn next(&self) -> Option<JobIndex> {
        self.receiver.lock().await.recv().await
    }
}
