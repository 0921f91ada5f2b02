//! Scenario runner driving the load harness against a Kubernetes API server.
//!
//! Each configured [`Scenario`](config::Scenario) picks a remote operation, a concurrency, a
//! number of requests and a payload size. The synthesized payload is placed where the API server
//! enforces a size limit: a resource name in a URL, a `managedBy` field, the names of a custom
//! resource definition, or the name of a cluster role. Scenarios run one after another through
//! [`kubestress_harness::Harness`], and a report is printed after each.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod client;
pub mod config;
pub mod kubeconfig;
pub mod observability;
pub mod rate_limits;
pub mod report;
pub mod scenarios;
pub mod stresstest;
