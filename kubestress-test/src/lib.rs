//! Test utilities for kubestress.
//!
//! This crate provides utilities to facilitate testing of the harness and the scenarios that run
//! on top of it. See the modules for all available utilities.

pub mod server;
pub mod tracing;
