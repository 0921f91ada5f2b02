//! A bounded-concurrency load generation harness.
//!
//! The [`Harness`] drives a fixed number of workers against an [`Operation`], feeding every
//! worker job indices from a [`JobSource`] and a synthesized payload of a configured size. Each
//! attempt is classified as success or failure and folded into [`Statistics`], which are returned
//! as part of the final [`Report`] once every worker has finished.
//!
//! Payloads are random hex strings behind an optional prefix. Their exact length is the point:
//! they are used to test how a remote service behaves at, or beyond, its size limits.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod dispatcher;
pub mod error;
pub mod harness;
pub mod jobs;
pub mod payload;
pub mod stats;

pub use crate::dispatcher::Operation;
pub use crate::error::HarnessError;
pub use crate::harness::{Harness, HarnessBuilder, Report, per_second};
pub use crate::jobs::{JobIndex, JobQueue, JobSource};
pub use crate::stats::{Aggregator, Outcome, Statistics};
