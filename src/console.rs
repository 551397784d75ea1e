//! Human-readable progress and summaries on stdout.

use console::style;

use crate::mutant::MutationSite;
use crate::outcome::{MutationOutcome, MutationReport, RepositoryReport};
use crate::queue::QueueMetrics;

pub struct Console {
    verbose: bool,
}

impl Console {
    pub fn new(verbose: bool) -> Console {
        Console { verbose }
    }

    pub fn message(&self, message: &str) {
        println!("{message}");
    }

    /// One line per tested mutant. Survivors always print; the rest only
    /// with `--level debug` style verbosity.
    pub fn mutant_tested(&self, file: &str, site: &MutationSite, outcome: MutationOutcome) {
        let tag = match outcome {
            MutationOutcome::Killed => style("caught").green(),
            MutationOutcome::Survived => style("MISSED").red().bold(),
            MutationOutcome::Timeout => style("timeout").yellow(),
            MutationOutcome::BuildError => style("unviable").dim(),
            MutationOutcome::Skipped => style("skipped").dim(),
        };
        if self.verbose || outcome == MutationOutcome::Survived {
            println!("{tag:>8} {}", site.to_styled_string(file));
        }
    }

    pub fn file_summary(&self, report: &MutationReport) {
        println!(
            "{}: {} mutants tested in {}: {} caught, {} missed, {} timeout, {} unviable, {} skipped ({:.0}% caught)",
            style(&report.source_file).bold(),
            report.total_mutations(),
            humantime::format_duration(std::time::Duration::from_secs(
                report.baseline_duration.as_secs()
            )),
            style(report.killed()).green(),
            style(report.survived()).red(),
            report.timed_out(),
            report.build_errors(),
            report.skipped(),
            report.kill_percentage(),
        );
    }

    pub fn repository_summary(&self, report: &RepositoryReport, metrics: Option<QueueMetrics>) {
        println!(
            "{} files analyzed, {} with survivors; {} mutants: {} caught, {} missed, {} timeout, {} unviable, {} skipped ({:.0}% caught)",
            report.files_analyzed(),
            report.files_with_survivors(),
            report.total_mutations(),
            style(report.killed()).green(),
            style(report.survived()).red(),
            report.timed_out(),
            report.build_errors(),
            report.skipped(),
            report.kill_percentage(),
        );
        if self.verbose {
            if let Some(metrics) = metrics {
                println!(
                    "scheduler: {} dispatched, {} stolen",
                    metrics.dispatched_workloads, metrics.stolen_workloads
                );
            }
        }
    }
}
