//! Human-readable output of finished runs.

use std::fmt;
use std::time::Duration;

use bytesize::ByteSize;
use kubestress_harness::{Report, per_second};
use sketches_ddsketch::DDSketch;
use yansi::Paint;

/// Prints the summary of a single scenario.
pub fn print_report(report: &Report) {
    let stats = &report.statistics;

    println!();
    println!(
        "{} {} (concurrency: {}, payload: {})",
        "## Scenario".bold(),
        report.name.bold().blue(),
        report.concurrency.bold(),
        ByteSize::b(report.payload_size as u64)
    );
    if report.cancelled {
        println!(
            "{}",
            format!("CANCELLED after {} of {} jobs", stats.completed(), report.total)
                .bold()
                .yellow()
        );
    }

    print!("{} ({} ops", "SUCCESS:".bold().green(), stats.success_count.bold());
    if stats.fail_count > 0 {
        print!(
            ", {}",
            format!("{} FAILURES", stats.fail_count).bold().red()
        );
    }
    println!(") in {:.2?}", report.elapsed);

    print_ops(report.throughput(), report.success_throughput());
    print_throughput(stats.bytes_sent, report.elapsed);

    if let Some(average) = report.average_latency() {
        println!("  avg call: {:.2?}", average.bold());
    }
    if stats.success_timing.count() > 0 {
        print!("  {}", "success".green());
        print_percentiles(&stats.success_timing, Duration::from_secs_f64);
    }
    if stats.failure_timing.count() > 0 {
        print!("  {}", "failure".red());
        print_percentiles(&stats.failure_timing, Duration::from_secs_f64);
    }
}

/// Counts and bytes summed over several scenarios.
#[derive(Debug, Default)]
pub struct Totals {
    scenarios: usize,
    success_count: u64,
    fail_count: u64,
    bytes_sent: u64,
    elapsed: Duration,
}

impl Totals {
    /// Adds a finished scenario.
    pub fn add(&mut self, report: &Report) {
        self.scenarios += 1;
        self.success_count += report.statistics.success_count;
        self.fail_count += report.statistics.fail_count;
        self.bytes_sent += report.statistics.bytes_sent;
        self.elapsed += report.elapsed;
    }

    /// Prints the totals if more than one scenario ran.
    pub fn print(&self) {
        if self.scenarios < 2 {
            return;
        }

        println!();
        println!("{} ({} scenarios)", "## TOTALS".bold(), self.scenarios);
        print!("{} ({} ops", "SUCCESS:".bold().green(), self.success_count.bold());
        if self.fail_count > 0 {
            print!(
                ", {}",
                format!("{} FAILURES", self.fail_count).bold().red()
            );
        }
        println!(") in {:.2?}", self.elapsed);

        let completed = self.success_count + self.fail_count;
        print_ops(
            per_second(completed, self.elapsed),
            per_second(self.success_count, self.elapsed),
        );
        print_throughput(self.bytes_sent, self.elapsed);
    }
}

fn print_percentiles<T: fmt::Debug>(sketch: &DDSketch, map: impl Fn(f64) -> T) {
    let quantile = |q| sketch.quantile(q).ok().flatten().map(&map);

    let avg = sketch
        .sum()
        .map(|sum| map(sum / sketch.count() as f64));
    println!(
        " avg: {:.2?}; p50: {:.2?}; p90: {:.2?}; p99: {:.2?}",
        avg.bold(),
        quantile(0.5),
        quantile(0.9),
        quantile(0.99)
    );
}

fn print_ops(ops_ps: f64, success_ps: f64) {
    print!(
        "  {:.2} operations/s ({:.2} successful/s)",
        ops_ps.bold(),
        success_ps
    );
}

fn print_throughput(total: u64, duration: Duration) {
    let throughput = per_second(total, duration) as u64;
    println!(", {:.2}/s", ByteSize::b(throughput).bold());
}

#[cfg(test)]
mod tests {
    use kubestress_harness::Statistics;

    use super::*;

    fn report(success_count: u64, fail_count: u64, bytes_sent: u64) -> Report {
        Report {
            name: "test".into(),
            concurrency: 4,
            total: success_count + fail_count,
            payload_size: 64,
            elapsed: Duration::from_secs(2),
            cancelled: false,
            statistics: Statistics {
                success_count,
                fail_count,
                bytes_sent,
                ..Default::default()
            },
        }
    }

    #[test]
    fn totals_sum_scenarios() {
        let mut totals = Totals::default();
        totals.add(&report(10, 2, 768));
        totals.add(&report(5, 0, 320));

        assert_eq!(totals.scenarios, 2);
        assert_eq!(totals.success_count, 15);
        assert_eq!(totals.fail_count, 2);
        assert_eq!(totals.bytes_sent, 1088);
        assert_eq!(totals.elapsed, Duration::from_secs(4));
    }
}
