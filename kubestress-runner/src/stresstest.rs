//! Run the configured scenarios one after another and print their reports.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use indicatif::{ProgressBar, ProgressStyle};
use kubestress_harness::{Harness, Report};
use tokio_util::sync::CancellationToken;

use crate::client::ApiClient;
use crate::config::{OperationConfig, Scenario};
use crate::report::{self, Totals};
use crate::scenarios::{Jobs, Lookup, Roles, Schemas};

/// Command line adjustments applied on top of the configured scenarios.
#[derive(Debug, Default)]
pub struct Overrides {
    /// Only run scenarios with these names. Empty runs all scenarios.
    pub only: Vec<String>,
    /// Replaces the concurrency of every scenario.
    pub concurrency: Option<usize>,
    /// Replaces the number of requests of every scenario.
    pub total: Option<u64>,
    /// Replaces the payload size of every scenario.
    pub payload_size: Option<ByteSize>,
}

impl Overrides {
    /// Selects the scenarios to run and applies the overrides to them.
    pub fn apply(&self, scenarios: Vec<Scenario>) -> Result<Vec<Scenario>> {
        for name in &self.only {
            if !scenarios.iter().any(|scenario| scenario.name() == name) {
                anyhow::bail!("unknown scenario `{name}`");
            }
        }

        let selected: Vec<_> = scenarios
            .into_iter()
            .filter(|scenario| self.only.is_empty() || self.only.iter().any(|n| n == scenario.name()))
            .map(|mut scenario| {
                if let Some(concurrency) = self.concurrency {
                    scenario.concurrency = concurrency;
                }
                if let Some(total) = self.total {
                    scenario.total = total;
                }
                if let Some(payload_size) = self.payload_size {
                    scenario.payload_size = Some(payload_size);
                }
                scenario
            })
            .collect();

        if selected.is_empty() {
            anyhow::bail!("no scenarios configured");
        }
        for scenario in &selected {
            scenario.validate()?;
        }

        Ok(selected)
    }
}

/// Runs `scenarios` sequentially against the API server.
///
/// Prints a report after every scenario and totals at the end. Once `cancel` fires, the running
/// scenario winds down and the remaining ones are skipped.
pub async fn run(
    client: Arc<ApiClient>,
    scenarios: Vec<Scenario>,
    cancel: CancellationToken,
) -> Result<Vec<Report>> {
    for scenario in &scenarios {
        scenario.validate()?;
    }

    let mut reports = Vec::with_capacity(scenarios.len());
    let mut totals = Totals::default();

    for scenario in scenarios {
        if cancel.is_cancelled() {
            tracing::warn!(scenario = scenario.name(), "skipping scenario after cancellation");
            continue;
        }

        let report = run_scenario(Arc::clone(&client), &scenario, cancel.clone()).await?;
        report::print_report(&report);
        totals.add(&report);
        reports.push(report);
    }

    totals.print();
    Ok(reports)
}

async fn run_scenario(
    client: Arc<ApiClient>,
    scenario: &Scenario,
    cancel: CancellationToken,
) -> Result<Report> {
    let payload_size = usize::try_from(scenario.payload_size().as_u64())
        .context("payload size exceeds the address space")?;

    let harness = Harness::builder(scenario.name())
        .concurrency(scenario.concurrency)
        .total(scenario.total)
        .payload_size(payload_size)
        .sample_every(scenario.sample_every)
        .cleanup(scenario.cleanup)
        .cancellation(cancel)
        .build()
        .with_context(|| format!("invalid scenario `{}`", scenario.name()))?;

    let bar = ProgressBar::new(scenario.total)
        .with_style(ProgressStyle::with_template(
            "{spinner} {msg} {wide_bar} {pos}/{len} {elapsed}",
        )?)
        .with_message(format!("Running {}:", scenario.name()));
    bar.enable_steady_tick(Duration::from_millis(100));

    let aggregator = harness.aggregator();
    let run = execute(harness, client, &scenario.operation);
    tokio::pin!(run);

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let report = loop {
        tokio::select! {
            report = &mut run => break report,
            _ = ticker.tick() => bar.set_position(aggregator.completed()),
        }
    };
    bar.finish_and_clear();

    Ok(report)
}

async fn execute(harness: Harness, client: Arc<ApiClient>, operation: &OperationConfig) -> Report {
    match operation.clone() {
        OperationConfig::Lookup {
            group,
            version,
            namespace,
            object,
        } => {
            harness
                .run(Lookup::new(client, group, version, namespace, object))
                .await
        }
        OperationConfig::Jobs { namespace, image } => {
            harness.run(Jobs::new(client, namespace, image)).await
        }
        OperationConfig::Schemas => harness.run(Schemas::new(client)).await,
        OperationConfig::Roles => harness.run(Roles::new(client)).await,
    }
}
