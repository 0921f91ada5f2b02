//! The remote operations a scenario can exercise.
//!
//! Every scenario implements [`Operation`](kubestress_harness::Operation) against a shared
//! [`ApiClient`](crate::client::ApiClient). The synthesized payload ends up in a different part of
//! each request, which is what makes the scenarios useful for probing different size limits of the
//! API server.

use std::time::{SystemTime, UNIX_EPOCH};

mod jobs;
mod lookup;
mod roles;
mod schemas;

pub use self::jobs::Jobs;
pub use self::lookup::Lookup;
pub use self::roles::Roles;
pub use self::schemas::Schemas;

/// Seconds since the Unix epoch.
fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// The current UTC wall-clock time formatted as `HHMMSS`.
fn clock_hhmmss() -> String {
    let seconds = unix_seconds() % 86_400;
    format!(
        "{:02}{:02}{:02}",
        seconds / 3600,
        seconds % 3600 / 60,
        seconds % 60
    )
}
